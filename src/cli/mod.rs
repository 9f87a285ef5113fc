//! CLI command implementations

pub mod error;
pub mod sync;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;

use crate::fetcher::http::DEFAULT_BASE_URL;

pub use error::CliError;
pub use sync::{ChildrenArgs, SyncArgs, SyncSummary};

/// Content Sync CLI
#[derive(Parser, Debug)]
#[command(name = "content-sync")]
#[command(about = "Sync records and their child relations out of a paginated content API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Maximum number of retries for failed requests (overrides CONTENT_SYNC_MAX_RETRIES, range: 0-20)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: Option<u32>,

    /// Serve Prometheus metrics on this address (e.g., 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// API base URL
    #[arg(long, global = true, env = "CONTENT_API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API version header value
    #[arg(long, global = true, env = "CONTENT_API_VERSION")]
    pub api_version: Option<String>,

    /// Integration token
    #[arg(long, global = true, env = "CONTENT_API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every record of a database, optionally expanding child relations
    Sync(SyncArgs),

    /// List the child blocks of a block
    Children(ChildrenArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
