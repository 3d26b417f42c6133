use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use courier_gateway::{Config, Daemon};

/// Courier - message relay gateway between a `WhatsApp` session and HTTP webhooks
#[derive(Parser)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,courier_gateway=info",
        1 => "info,courier_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing::info!(port = cli.port, "starting courier gateway");

    Daemon::new(config, cli.port).run().await?;

    Ok(())
}
