//! Tunnel process management.
//!
//! A [`TunnelManager`] owns at most one running tunnel process (ngrok by
//! default) and discovers its public URL through the tunnel's local status
//! API. [`TunnelState`] records a tunnel that outlives the command that
//! started it, so a later invocation can stop it.

use std::path::Path;
use std::process::Child;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;
use crate::subprocess::{self, Tool};

pub const DEFAULT_BINARY: &str = "ngrok";
pub const DEFAULT_STATUS_URL: &str = "http://localhost:4040/api/tunnels";
pub const DEFAULT_STATE_FILE: &str = ".botkit/tunnel.json";

/// How long a stopped tunnel gets to exit before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("tunnel is already running at {public_url}")]
    AlreadyRunning { public_url: String },

    #[error("{binary} is not installed")]
    NotInstalled { binary: String },

    #[error("failed to spawn tunnel: {0}")]
    Spawn(String),

    #[error("tunnel process exited early ({0})")]
    Exited(String),

    #[error("tunnel did not become ready within {timeout_secs}s: {last_error}")]
    NotReady {
        timeout_secs: u64,
        last_error: String,
    },

    #[error("querying tunnel status API: {0}")]
    Status(String),

    #[error("malformed tunnel status response: {0}")]
    Malformed(String),

    #[error("tunnel status API lists no tunnels")]
    NoTunnels,
}

#[derive(Debug, Deserialize)]
struct TunnelList {
    tunnels: Vec<TunnelEntry>,
}

#[derive(Debug, Deserialize)]
struct TunnelEntry {
    public_url: String,
}

/// Query the tunnel status API and return the first tunnel's public URL.
pub fn get_public_url(status_url: &str) -> Result<String, TunnelError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(Duration::from_secs(5)))
        .build()
        .into();
    fetch_public_url(&agent, status_url)
}

fn fetch_public_url(agent: &ureq::Agent, status_url: &str) -> Result<String, TunnelError> {
    let mut response = agent
        .get(status_url)
        .call()
        .map_err(|e| TunnelError::Status(e.to_string()))?;
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| TunnelError::Status(e.to_string()))?;
    let list: TunnelList =
        serde_json::from_str(&body).map_err(|e| TunnelError::Malformed(e.to_string()))?;
    list.tunnels
        .into_iter()
        .next()
        .map(|t| t.public_url)
        .ok_or(TunnelError::NoTunnels)
}

#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub binary: String,
    pub status_url: String,
    /// How long to wait for the status API to report a tunnel.
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            status_url: DEFAULT_STATUS_URL.to_string(),
            ready_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A running tunnel process and the public URL it was assigned.
#[derive(Debug)]
pub struct Tunnel {
    child: Child,
    port: u16,
    public_url: String,
}

impl Tunnel {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Release the process without killing it and describe it for a state file.
    pub fn detach(self) -> TunnelState {
        let pid = self.child.id();
        TunnelState {
            pid,
            started_at: subprocess::start_time(pid),
            port: self.port,
            public_url: self.public_url,
        }
    }

    fn terminate(mut self) {
        subprocess::terminate_child(&mut self.child, STOP_GRACE);
    }
}

/// Owns the single tunnel slot.
#[derive(Debug)]
pub struct TunnelManager {
    options: TunnelOptions,
    slot: Option<Tunnel>,
}

impl TunnelManager {
    pub const fn new(options: TunnelOptions) -> Self {
        Self {
            options,
            slot: None,
        }
    }

    pub const fn is_running(&self) -> bool {
        self.slot.is_some()
    }

    pub fn tunnel(&self) -> Option<&Tunnel> {
        self.slot.as_ref()
    }

    pub fn public_url(&self) -> Option<&str> {
        self.slot.as_ref().map(Tunnel::public_url)
    }

    /// Start a tunnel to `port` and wait until it reports a public URL.
    ///
    /// Refuses to start while a tunnel is already tracked. On any failure the
    /// spawned process is killed and the slot stays empty.
    pub fn start(&mut self, port: u16) -> Result<String, TunnelError> {
        if let Some(tunnel) = &self.slot {
            tracing::info!(public_url = tunnel.public_url(), "tunnel is already running");
            return Err(TunnelError::AlreadyRunning {
                public_url: tunnel.public_url.clone(),
            });
        }

        let mut child = Tool::new(&self.options.binary)
            .arg("http")
            .arg(port.to_string())
            .spawn_detached()
            .map_err(|e| match e.downcast_ref::<ExitError>() {
                Some(ExitError::ToolNotFound { .. }) => TunnelError::NotInstalled {
                    binary: self.options.binary.clone(),
                },
                _ => TunnelError::Spawn(format!("{e:#}")),
            })?;
        tracing::info!(pid = child.id(), port, binary = %self.options.binary, "spawned tunnel");

        match self.wait_until_ready(&mut child) {
            Ok(public_url) => {
                tracing::info!(%public_url, "tunnel ready");
                self.slot = Some(Tunnel {
                    child,
                    port,
                    public_url: public_url.clone(),
                });
                Ok(public_url)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(error = %e, "tunnel failed to start");
                Err(e)
            }
        }
    }

    fn wait_until_ready(&self, child: &mut Child) -> Result<String, TunnelError> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.options.poll_interval.max(Duration::from_secs(1))))
            .build()
            .into();
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Err(TunnelError::Exited(status.to_string())),
                Ok(None) => {}
                Err(e) => return Err(TunnelError::Spawn(e.to_string())),
            }

            let last_error = match fetch_public_url(&agent, &self.options.status_url) {
                Ok(url) => return Ok(url),
                Err(e) => e,
            };

            if start.elapsed() >= self.options.ready_timeout {
                return Err(TunnelError::NotReady {
                    timeout_secs: self.options.ready_timeout.as_secs(),
                    last_error: last_error.to_string(),
                });
            }
            tracing::debug!(error = %last_error, "tunnel not ready yet");
            std::thread::sleep(self.options.poll_interval);
        }
    }

    /// Stop the tracked tunnel, if any. Safe to call repeatedly.
    pub fn stop(&mut self) {
        match self.slot.take() {
            Some(tunnel) => {
                let pid = tunnel.pid();
                tunnel.terminate();
                tracing::info!(pid, "tunnel stopped");
            }
            None => tracing::info!("no tunnel is running"),
        }
    }

    /// Hand the tracked tunnel to the caller, leaving the process running.
    pub fn detach(&mut self) -> Option<Tunnel> {
        self.slot.take()
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        if self.slot.is_some() {
            self.stop();
        }
    }
}

/// A tunnel left running by `botkit tunnel start`, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelState {
    pub pid: u32,
    /// Start time of `pid`, so a recycled pid is not taken for the tunnel.
    #[serde(default)]
    pub started_at: Option<u64>,
    pub port: u16,
    pub public_url: String,
}

impl TunnelState {
    /// Load the state file; `None` when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let state = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn remove(path: &Path) -> anyhow::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("removing {}", path.display()))),
        }
    }

    /// Load the state file, keeping it only while the recorded tunnel runs.
    /// A stale file is removed.
    pub fn load_live(path: &Path) -> anyhow::Result<Option<Self>> {
        match Self::load(path)? {
            Some(state) if state.is_alive() => Ok(Some(state)),
            Some(state) => {
                tracing::info!(pid = state.pid, "removing stale tunnel state");
                Self::remove(path)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Whether the recorded process still exists and is the one recorded.
    ///
    /// A record without a start time cannot be verified and counts as dead.
    pub fn is_alive(&self) -> bool {
        let Some(started_at) = self.started_at else {
            return false;
        };
        subprocess::is_alive(self.pid) && subprocess::start_time(self.pid) == Some(started_at)
    }

    /// Ask the recorded process to terminate.
    pub fn terminate(&self) -> anyhow::Result<()> {
        subprocess::terminate(self.pid)
            .with_context(|| format!("terminating tunnel process {}", self.pid))
    }
}
