use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// A tunnel binary that passes the install check, then runs `body`.
#[cfg(unix)]
fn fake_tunnel(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-tunnel");
    write_script(
        &path,
        &format!("if [ \"$1\" = --version ]; then echo fake-tunnel 1.0; exit 0; fi\n{body}\n"),
    );
    path
}

/// A virtualenv whose `chalice` reports what it was started with and exits.
#[cfg(unix)]
fn fake_venv(dir: &Path) -> PathBuf {
    let venv = dir.join(".venv");
    write_script(
        &venv.join("bin/chalice"),
        "printf 'VIRTUAL_ENV=%s\\n' \"$VIRTUAL_ENV\"\n\
         printf 'WB=[%s]\\n' \"$WEBHOOK_BASE_URL\"\n\
         printf 'ARGS=%s\\n' \"$*\"\n",
    );
    venv
}

fn tunnels_body(url: &str) -> String {
    serde_json::json!({"tunnels": [{"public_url": url, "proto": "https"}]}).to_string()
}

#[cfg(unix)]
fn launch_cmd(dir: &Path, tunnel_bin: &Path, tunnel_api: &str) -> Command {
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.current_dir(dir)
        .arg("launch")
        .arg("--port")
        .arg("8123")
        .arg("--tunnel-bin")
        .arg(tunnel_bin)
        .args(["--tunnel-api", tunnel_api, "--tunnel-timeout", "1"])
        .arg("--venv")
        .arg(fake_venv(dir))
        .arg("--state-file")
        .arg(dir.join("tunnel.json"));
    cmd
}

#[test]
fn new_scaffolds_project() {
    let root = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args(["new", "mybot", "TOKEN123", "--dependencies", "openai", "--project-root"])
        .arg(root.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "Project mybot has been successfully created.",
        ));

    let dir = root.path().join("mybot");
    let requirements = std::fs::read_to_string(dir.join("requirements.txt")).unwrap();
    assert_eq!(requirements, "chalice\npython-telegram-bot==13.11\nopenai\n");
    assert!(dir.join("app.py").is_file());
    assert!(dir.join(".chalice/config.json").is_file());
    assert!(dir.join(".chalice/dev-policy.json").is_file());
}

#[test]
fn new_rejects_path_like_names() {
    let root = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args(["new", "../escape", "TOKEN", "--project-root"])
        .arg(root.path());
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("project name"));
}

#[test]
fn new_requires_token() {
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args(["new", "mybot"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("required arguments were not provided"));
}

#[test]
fn launch_exits_1_without_tunnel_binary() {
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args(["launch", "--tunnel-bin", "nonexistent-tunnel-xyz"]);
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("nonexistent-tunnel-xyz is not installed"));
}

#[test]
fn tunnel_stop_without_tunnel_is_noop() {
    let root = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args(["tunnel", "stop", "--state-file"])
        .arg(root.path().join("tunnel.json"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No tunnel is running."));
}

#[test]
fn tunnel_get_url_reports_unreachable_api() {
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args([
        "tunnel",
        "get-url",
        "--tunnel-api",
        "http://127.0.0.1:9/api/tunnels",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to retrieve tunnel URL"));
}

#[test]
fn tunnel_rejects_unknown_action() {
    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args(["tunnel", "restart"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value 'restart'"));
}

#[cfg(unix)]
#[test]
fn launch_continues_without_tunnel_or_config() {
    let dir = tempfile::tempdir().unwrap();
    let tunnel = fake_tunnel(dir.path(), "exit 1");
    let venv = dir.path().join(".venv");

    let mut cmd = launch_cmd(dir.path(), &tunnel, "http://127.0.0.1:9/api/tunnels");
    cmd.arg("--config").arg(dir.path().join("missing.json"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Failed to start tunnel."))
        .stdout(predicate::str::contains(
            "Error: Chalice configuration file",
        ))
        .stdout(predicate::str::contains("WB=[]"))
        .stdout(predicate::str::contains(format!(
            "VIRTUAL_ENV={}",
            venv.display()
        )))
        .stdout(predicate::str::contains(
            "ARGS=local --port 8123 --stage local",
        ))
        .stderr(predicate::function(|err: &str| {
            err.matches("exited early").count() == 1
        }));
}

#[cfg(unix)]
#[test]
fn launch_strict_exits_4_when_tunnel_fails() {
    let dir = tempfile::tempdir().unwrap();
    let tunnel = fake_tunnel(dir.path(), "exit 1");

    let mut cmd = launch_cmd(dir.path(), &tunnel, "http://127.0.0.1:9/api/tunnels");
    cmd.arg("--strict");
    cmd.assert()
        .code(4)
        .stdout(predicate::str::contains("Failed to start tunnel."))
        .stdout(predicate::str::contains("WB=").not());
}

#[cfg(unix)]
#[test]
fn launch_registers_webhook_and_reports_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let tunnel = fake_tunnel(dir.path(), "exec sleep 30");
    let config = dir.path().join("config.json");
    std::fs::write(
        &config,
        r#"{"stages": {"local": {"environment_variables": {"TELEGRAM_BOT_ID": "TOKEN123"}}}}"#,
    )
    .unwrap();

    let mut api = mockito::Server::new();
    let _tunnels = api
        .mock("GET", "/api/tunnels")
        .with_status(200)
        .with_body(tunnels_body("https://abc.ngrok.app"))
        .create();
    let webhook = api
        .mock("POST", "/botTOKEN123/setWebhook")
        .match_body(mockito::Matcher::Json(
            serde_json::json!({"url": "https://abc.ngrok.app/webhook"}),
        ))
        .with_status(400)
        .with_body(r#"{"ok":false,"error_code":400,"description":"X"}"#)
        .create();

    let mut cmd = launch_cmd(
        dir.path(),
        &tunnel,
        &format!("{}/api/tunnels", api.url()),
    );
    cmd.arg("--config")
        .arg(&config)
        .args(["--telegram-api", &api.url()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Tunnel URL: https://abc.ngrok.app"))
        .stdout(predicate::str::contains("WB=[https://abc.ngrok.app]"))
        .stdout(predicate::str::contains("Failed to set webhook. Error: X"));
    webhook.assert();
}

#[cfg(unix)]
#[test]
fn launch_reuses_tunnel_from_tunnel_start() {
    let dir = tempfile::tempdir().unwrap();
    let spawn_log = dir.path().join("spawned.log");
    let tunnel = fake_tunnel(
        dir.path(),
        &format!("echo spawned >> '{}'\nexec sleep 30", spawn_log.display()),
    );
    let state_file = dir.path().join("tunnel.json");

    let mut api = mockito::Server::new();
    let _tunnels = api
        .mock("GET", "/api/tunnels")
        .with_status(200)
        .with_body(tunnels_body("https://abc.ngrok.app"))
        .create();
    let tunnel_api = format!("{}/api/tunnels", api.url());

    let mut start = Command::cargo_bin("botkit").unwrap();
    start
        .args(["tunnel", "start", "--port", "8123", "--tunnel-api", &tunnel_api])
        .arg("--tunnel-bin")
        .arg(&tunnel)
        .arg("--state-file")
        .arg(&state_file);
    start
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Tunnel started with URL: https://abc.ngrok.app",
        ));

    let mut cmd = launch_cmd(dir.path(), &tunnel, &tunnel_api);
    cmd.arg("--config").arg(dir.path().join("missing.json"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Reusing tunnel already running"))
        .stdout(predicate::str::contains("WB=[https://abc.ngrok.app]"));

    let spawned = std::fs::read_to_string(&spawn_log).unwrap();
    assert_eq!(spawned.lines().count(), 1);
    assert!(state_file.exists());

    let mut stop = Command::cargo_bin("botkit").unwrap();
    stop.args(["tunnel", "stop", "--state-file"]).arg(&state_file);
    stop.assert()
        .success()
        .stdout(predicate::str::contains("Tunnel stopped."));
    assert!(!state_file.exists());
}

#[test]
fn tunnel_stop_leaves_unrelated_process_alone() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("tunnel.json");
    let mut bystander = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    std::fs::write(
        &state_file,
        serde_json::json!({
            "pid": bystander.id(),
            "port": 8000,
            "public_url": "https://old.ngrok.app",
        })
        .to_string(),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("botkit").unwrap();
    cmd.args(["tunnel", "stop", "--state-file"]).arg(&state_file);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No tunnel is running."));

    assert!(bystander.try_wait().unwrap().is_none());
    assert!(!state_file.exists());
    bystander.kill().unwrap();
    bystander.wait().unwrap();
}
