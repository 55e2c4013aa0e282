use std::process::ExitCode;

use clap::{Parser, Subcommand};

use botkit::commands::launch::LaunchArgs;
use botkit::commands::new::NewArgs;
use botkit::commands::tunnel::TunnelArgs;
use botkit::{error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "botkit",
    version,
    about = "Run and scaffold Telegram bots hosted on Chalice"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the tunnel process (start, stop, get-url)
    Tunnel(TunnelArgs),
    /// Run the bot locally behind a tunnel and register its webhook
    Launch(LaunchArgs),
    /// Generate a new bot project
    New(NewArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Tunnel(_) => "tunnel",
            Self::Launch(_) => "launch",
            Self::New(_) => "new",
        }
    }
}

fn main() -> ExitCode {
    telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Tunnel(args) => args.execute(),
        Commands::Launch(args) => args.execute(),
        Commands::New(args) => args.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
