//! `botkit launch`: run the bot locally behind a tunnel.
//!
//! Starts a tunnel, starts `chalice local` from the project's virtualenv,
//! points the bot's Telegram webhook at the tunnel, then supervises the
//! server until it exits or the user interrupts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use crate::commands::tunnel::TunnelFlags;
use crate::config::{self, CONFIG_PATH, LOCAL_STAGE};
use crate::error::ExitError;
use crate::subprocess::{self, Tool};
use crate::telegram::{self, DEFAULT_API_BASE, WebhookClient, webhook_url};
use crate::tunnel::{TunnelError, TunnelManager, TunnelState};

/// Environment variable carrying the tunnel URL into the server.
pub const WEBHOOK_BASE_ENV: &str = "WEBHOOK_BASE_URL";

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Args)]
pub struct LaunchArgs {
    /// Port the Chalice app listens on
    #[arg(long, default_value_t = 8000)]
    pub port: u16,
    /// Chalice stage to run
    #[arg(long, default_value = "local")]
    pub stage: String,
    /// Path to the Python virtual environment
    #[arg(long, default_value = ".venv")]
    pub venv: PathBuf,
    /// Disable the auto-reloader in Chalice
    #[arg(long)]
    pub no_autoreload: bool,
    /// Stage whose bot token is registered with Telegram
    #[arg(long, default_value = LOCAL_STAGE)]
    pub token_stage: String,
    /// Chalice configuration file
    #[arg(long, default_value = CONFIG_PATH)]
    pub config: PathBuf,
    /// Telegram Bot API base URL
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub telegram_api: String,
    /// Exit instead of serving without a tunnel or registered webhook
    #[arg(long)]
    pub strict: bool,
    #[command(flatten)]
    pub tunnel: TunnelFlags,
}

/// How supervision of the server ended.
#[derive(Debug, PartialEq, Eq)]
pub enum ServerExit {
    Exited(Option<i32>),
    Interrupted,
}

impl LaunchArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        if !subprocess::is_installed(&self.tunnel.tunnel_bin) {
            return Err(ExitError::ToolNotFound {
                tool: self.tunnel.tunnel_bin.clone(),
            }
            .into());
        }

        let signals = install_signal_handler()?;

        let mut tunnel = TunnelManager::new(self.tunnel.options());
        let public_url = self.start_tunnel(&mut tunnel)?;

        if signals.try_recv().is_ok() {
            eprintln!("Received interrupt signal, shutting down...");
            tunnel.stop();
            return Ok(());
        }

        let mut server = server_command(
            &self.venv,
            self.port,
            &self.stage,
            self.no_autoreload,
            public_url.as_deref(),
        )?
        .spawn_inherited()
        .context("starting chalice local")?;
        tracing::info!(pid = server.id(), port = self.port, stage = %self.stage, "server started");

        if let Err(e) = self.register(public_url.as_deref()) {
            shutdown(&mut tunnel, &mut server);
            return Err(e);
        }

        match supervise(&mut server, &signals)? {
            ServerExit::Interrupted => {
                eprintln!("Received interrupt signal, shutting down...");
                shutdown(&mut tunnel, &mut server);
            }
            ServerExit::Exited(code) => {
                tracing::info!(?code, "server exited");
                tunnel.stop();
            }
        }
        Ok(())
    }

    /// Start a tunnel for the server, or reuse the one `botkit tunnel start`
    /// left running for the same port.
    ///
    /// A recorded tunnel for another port is refused rather than doubled:
    /// a second agent would answer on the same status API.
    fn start_tunnel(&self, tunnel: &mut TunnelManager) -> anyhow::Result<Option<String>> {
        let started = match TunnelState::load_live(&self.tunnel.state_file)? {
            Some(state) if state.port == self.port => {
                tracing::info!(pid = state.pid, "reusing recorded tunnel");
                println!("Reusing tunnel already running (pid {}).", state.pid);
                Ok(state.public_url)
            }
            Some(state) => {
                println!(
                    "A tunnel for port {} is already running (pid {}); stop it with `botkit tunnel stop`.",
                    state.port, state.pid
                );
                Err(TunnelError::AlreadyRunning {
                    public_url: state.public_url,
                })
            }
            None => tunnel.start(self.port),
        };

        match started {
            Ok(url) => {
                println!("Tunnel URL: {url}");
                Ok(Some(url))
            }
            Err(e) => {
                println!("Failed to start tunnel.");
                self.degrade(format!("tunnel: {e}"))?;
                Ok(None)
            }
        }
    }

    /// Read the bot token and point its webhook at the tunnel.
    fn register(&self, public_url: Option<&str>) -> anyhow::Result<()> {
        let token = match config::read_bot_token(&self.config, &self.token_stage) {
            Ok(token) => token,
            Err(e) => {
                println!("Error: {e}");
                return self.degrade(format!("config: {e}"));
            }
        };
        println!("Telegram bot token loaded for stage '{}'.", self.token_stage);

        let Some(base) = public_url else {
            println!("No tunnel URL; skipping webhook registration.");
            return self.degrade("no tunnel URL to register".to_string());
        };

        let client = WebhookClient::new(&self.telegram_api);
        if telegram::register_webhook(&client, &token, &webhook_url(base)) {
            Ok(())
        } else {
            self.degrade("webhook registration failed".to_string())
        }
    }

    /// Continue without the failed step, or abort under `--strict`.
    fn degrade(&self, reason: String) -> anyhow::Result<()> {
        if self.strict {
            Err(ExitError::Degraded(reason).into())
        } else {
            tracing::warn!(%reason, "continuing in degraded mode");
            Ok(())
        }
    }
}

/// Build the `chalice local` invocation inside `venv`, without a shell.
pub fn server_command(
    venv: &Path,
    port: u16,
    stage: &str,
    no_autoreload: bool,
    webhook_base: Option<&str>,
) -> anyhow::Result<Tool> {
    let venv = std::path::absolute(venv).unwrap_or_else(|_| venv.to_path_buf());
    let bin = venv.join("bin");

    let mut paths = vec![bin.clone()];
    if let Some(inherited) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&inherited));
    }
    let path: OsString = std::env::join_paths(paths).context("building PATH for chalice")?;

    let mut tool = Tool::new(bin.join("chalice"))
        .args(&["local", "--port", &port.to_string(), "--stage", stage]);
    if no_autoreload {
        tool = tool.arg("--no-autoreload");
    }
    Ok(tool
        .env("VIRTUAL_ENV", venv.as_os_str())
        .env("PATH", path)
        .env(WEBHOOK_BASE_ENV, webhook_base.unwrap_or_default()))
}

/// Forward SIGINT/SIGTERM into a channel for the supervising loop.
fn install_signal_handler() -> anyhow::Result<Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("installing signal handler")?;
    Ok(rx)
}

/// Block until the server exits or a signal arrives on `signals`.
pub fn supervise(server: &mut Child, signals: &Receiver<()>) -> anyhow::Result<ServerExit> {
    loop {
        if let Some(status) = server.try_wait().context("waiting for chalice local")? {
            return Ok(ServerExit::Exited(status.code()));
        }
        match signals.recv_timeout(POLL_INTERVAL) {
            Ok(()) => return Ok(ServerExit::Interrupted),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let status = server.wait().context("waiting for chalice local")?;
                return Ok(ServerExit::Exited(status.code()));
            }
        }
    }
}

/// Stop the tunnel and terminate the server, escalating to a kill if it
/// outlives the grace period. Best effort: grandchildren are not tracked.
pub fn shutdown(tunnel: &mut TunnelManager, server: &mut Child) {
    tunnel.stop();
    subprocess::terminate_child(server, SHUTDOWN_GRACE);
}
