use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, ValueEnum};

use crate::tunnel::{
    DEFAULT_BINARY, DEFAULT_STATE_FILE, DEFAULT_STATUS_URL, TunnelManager, TunnelOptions,
    TunnelState, get_public_url,
};

/// Tunnel settings shared by `tunnel` and `launch`.
#[derive(Debug, Clone, Args)]
pub struct TunnelFlags {
    /// Tunnel executable
    #[arg(long, default_value = DEFAULT_BINARY)]
    pub tunnel_bin: String,
    /// Tunnel status API endpoint
    #[arg(long, default_value = DEFAULT_STATUS_URL)]
    pub tunnel_api: String,
    /// Seconds to wait for the tunnel to report a public URL
    #[arg(long, default_value_t = 15)]
    pub tunnel_timeout: u64,
    /// Where `tunnel start` records a running tunnel for later invocations
    #[arg(long, default_value = DEFAULT_STATE_FILE)]
    pub state_file: PathBuf,
}

impl TunnelFlags {
    pub fn options(&self) -> TunnelOptions {
        TunnelOptions {
            binary: self.tunnel_bin.clone(),
            status_url: self.tunnel_api.clone(),
            ready_timeout: Duration::from_secs(self.tunnel_timeout),
            ..TunnelOptions::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TunnelAction {
    Start,
    Stop,
    GetUrl,
}

#[derive(Debug, Args)]
pub struct TunnelArgs {
    /// Action to perform: start, stop, or get-url
    #[arg(value_enum)]
    pub action: TunnelAction,
    /// Local port to expose
    #[arg(long, default_value_t = 8000)]
    pub port: u16,
    #[command(flatten)]
    pub tunnel: TunnelFlags,
}

impl TunnelArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self.action {
            TunnelAction::Start => self.start(),
            TunnelAction::Stop => self.stop(),
            TunnelAction::GetUrl => self.get_url(),
        }
    }

    fn start(&self) -> anyhow::Result<()> {
        if let Some(state) = TunnelState::load_live(&self.tunnel.state_file)? {
            println!(
                "Tunnel is already running at {} (pid {}).",
                state.public_url, state.pid
            );
            return Ok(());
        }

        let mut manager = TunnelManager::new(self.tunnel.options());
        let public_url = manager
            .start(self.port)
            .context("failed to start tunnel")?;

        let Some(tunnel) = manager.detach() else {
            anyhow::bail!("tunnel vanished after starting");
        };
        let state = tunnel.detach();
        if let Err(e) = state.save(&self.tunnel.state_file) {
            let _ = state.terminate();
            return Err(e);
        }

        println!("Tunnel started with URL: {public_url}");
        println!("export WEBHOOK_BASE_URL={public_url}");
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        let path = &self.tunnel.state_file;
        match TunnelState::load_live(path)? {
            Some(state) => {
                state.terminate()?;
                TunnelState::remove(path)?;
                println!("Tunnel stopped.");
            }
            None => {
                tracing::info!(path = %path.display(), "no running tunnel recorded");
                println!("No tunnel is running.");
            }
        }
        Ok(())
    }

    fn get_url(&self) -> anyhow::Result<()> {
        let url = get_public_url(&self.tunnel.tunnel_api)
            .context("failed to retrieve tunnel URL")?;
        println!("Tunnel public URL: {url}");
        Ok(())
    }
}
