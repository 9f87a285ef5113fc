//! Main entry point for the content-sync CLI

use clap::Parser;
use content_sync::cli::{Cli, CliError, Commands};
use content_sync::metrics::init_metrics;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("content_sync=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr).map_err(|e| anyhow::anyhow!("failed to start metrics exporter: {e}"))?;
    }

    match &cli.command {
        Commands::Sync(args) => args.execute(cli).await?,
        Commands::Children(args) => args.execute(cli).await?,
    };
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // No pipeline-wide cancellation: Ctrl+C just ends the process
    let result = tokio::select! {
        result = run(&cli) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl+C received - aborting sync");
            std::process::exit(130);
        }
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
        std::process::exit(code);
    }
}
