//! Sync and children command implementations

use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Cli, CliError, OutputFormat};
use crate::config::SyncConfig;
use crate::expander::RelationExpander;
use crate::fetcher::http::HttpContentSource;
use crate::fetcher::pagination::{FetchReport, PaginatedFetcher};
use crate::fetcher::resilient::ResilientCaller;
use crate::fetcher::{ContentSource, QueryRequest};
use crate::output;
use crate::Record;

/// Arguments for the sync command
#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Database to query
    #[arg(long)]
    pub database: String,

    /// Query filter as a JSON object
    #[arg(long)]
    pub filter: Option<String>,

    /// Resolve each record's child relations and insert them after their parent
    #[arg(long, default_value_t = false)]
    pub expand: bool,

    /// Write the synced records to this JSON file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Exit with status 2 when results are partial (anomalies, page ceiling, skipped children)
    #[arg(long, default_value_t = false)]
    pub fail_on_partial: bool,
}

/// Arguments for the children command
#[derive(Parser, Debug)]
pub struct ChildrenArgs {
    /// Block whose children to list
    #[arg(long)]
    pub block: String,

    /// Write the child blocks to this JSON file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Exit with status 2 when results are partial
    #[arg(long, default_value_t = false)]
    pub fail_on_partial: bool,
}

/// Outcome of one command run, printed as the final summary
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    /// Database or block that was fetched
    pub source: String,
    /// Records written (parents plus resolved children)
    pub records: usize,
    /// Records returned by pagination
    pub fetched: usize,
    /// Endpoint calls made by pagination
    pub pages: usize,
    /// How pagination ended
    pub termination: &'static str,
    /// Children resolved during expansion
    pub children_resolved: usize,
    /// Children skipped during expansion
    pub children_skipped: usize,
    /// Whether any part of the result is incomplete
    pub partial: bool,
    /// Where records were written
    pub output_path: Option<String>,
}

impl SyncSummary {
    fn from_report(source: &str, report: &FetchReport) -> Self {
        Self {
            source: source.to_string(),
            records: report.records.len(),
            fetched: report.records.len(),
            pages: report.calls,
            termination: report.termination.label(),
            children_resolved: 0,
            children_skipped: 0,
            partial: report.termination.is_partial(),
            output_path: None,
        }
    }
}

/// Shared pieces every command needs
struct Pipeline {
    config: SyncConfig,
    caller: Arc<ResilientCaller>,
    source: Arc<dyn ContentSource>,
}

impl Pipeline {
    fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let mut config = SyncConfig::from_env()?;
        if let Some(max_retries) = cli.max_retries {
            config = config.with_max_retries(max_retries);
        }

        let token = cli
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                CliError::InvalidArgument(
                    "missing API token: set CONTENT_API_TOKEN or pass --token".to_string(),
                )
            })?;

        let mut source = HttpContentSource::new(cli.base_url.clone(), token);
        if let Some(version) = &cli.api_version {
            source = source.with_api_version(version.clone());
        }

        Ok(Self {
            caller: Arc::new(ResilientCaller::from_config(&config)),
            source: Arc::new(source),
            config,
        })
    }
}

impl SyncArgs {
    /// Execute the sync command
    pub async fn execute(&self, cli: &Cli) -> Result<SyncSummary, CliError> {
        let request = match &self.filter {
            Some(raw) => QueryRequest::filtered(parse_filter(raw)?),
            None => QueryRequest::default(),
        };
        let pipeline = Pipeline::from_cli(cli)?;

        info!(database = %self.database, expand = self.expand, "Starting sync");

        let fetcher = PaginatedFetcher::new(
            pipeline.caller.clone(),
            pipeline.source.clone(),
            pipeline.config.max_query_pages,
        );
        let report = fetcher.fetch_database(&self.database, &request).await?;
        let mut summary = SyncSummary::from_report(&self.database, &report);

        let records = if self.expand {
            let expander = RelationExpander::new(pipeline.caller, pipeline.source, &pipeline.config);
            let expansion = expander.expand(report.records).await?;
            summary.children_resolved = expansion.resolved;
            summary.children_skipped = expansion.skipped();
            summary.partial |= expansion.is_partial();
            expansion.records
        } else {
            report.records
        };
        summary.records = records.len();

        finish(summary, &records, self.output.as_ref(), self.fail_on_partial, cli.output_format)
    }
}

impl ChildrenArgs {
    /// Execute the children command
    pub async fn execute(&self, cli: &Cli) -> Result<SyncSummary, CliError> {
        let pipeline = Pipeline::from_cli(cli)?;

        info!(block = %self.block, "Listing block children");

        let fetcher = PaginatedFetcher::new(
            pipeline.caller,
            pipeline.source,
            pipeline.config.max_children_pages,
        );
        let report = fetcher.fetch_children(&self.block).await?;
        let summary = SyncSummary::from_report(&self.block, &report);

        finish(summary, &report.records, self.output.as_ref(), self.fail_on_partial, cli.output_format)
    }
}

/// Write records, print the summary, and apply `--fail-on-partial`.
fn finish(
    mut summary: SyncSummary,
    records: &[Record],
    output: Option<&PathBuf>,
    fail_on_partial: bool,
    format: OutputFormat,
) -> Result<SyncSummary, CliError> {
    if let Some(path) = output {
        output::write_records(path, records)?;
        summary.output_path = Some(path.display().to_string());
    }

    match format {
        OutputFormat::Json => output_json(&summary, output.is_none().then_some(records))?,
        OutputFormat::Human => output_human(&summary, output.is_none().then_some(records)),
    }

    if summary.partial {
        warn!(
            source = %summary.source,
            termination = summary.termination,
            children_skipped = summary.children_skipped,
            "Sync finished with PARTIAL results"
        );
        if fail_on_partial {
            return Err(CliError::PartialResults(format!(
                "{} ({} records, pagination {}, {} children skipped)",
                summary.source, summary.records, summary.termination, summary.children_skipped
            )));
        }
    }

    Ok(summary)
}

/// Parse the `--filter` argument.
fn parse_filter(raw: &str) -> Result<Value, CliError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CliError::InvalidArgument(format!("Invalid --filter JSON: {e}")))?;
    if !value.is_object() {
        return Err(CliError::InvalidArgument(
            "--filter must be a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// Output summary as JSON, with the records inline when no output file was given
fn output_json(summary: &SyncSummary, records: Option<&[Record]>) -> Result<(), CliError> {
    let mut value = serde_json::to_value(summary)
        .map_err(|e| CliError::InvalidArgument(format!("Failed to encode summary: {e}")))?;
    if let (Some(records), Value::Object(map)) = (records, &mut value) {
        let records = serde_json::to_value(records)
            .map_err(|e| CliError::InvalidArgument(format!("Failed to encode records: {e}")))?;
        map.insert("items".to_string(), records);
    }
    println!("{value}");
    Ok(())
}

/// Output summary in human-readable format
fn output_human(summary: &SyncSummary, records: Option<&[Record]>) {
    if let Some(records) = records {
        for record in records {
            println!("{}  {}", record.id, record.label());
        }
    }

    if summary.partial {
        println!("\nSync completed with PARTIAL results!");
    } else {
        println!("\nSync completed successfully!");
    }
    println!("Source: {}", summary.source);
    println!("Pages fetched: {}", summary.pages);
    println!("Records fetched: {}", summary.fetched);
    if summary.children_resolved > 0 || summary.children_skipped > 0 {
        println!("Children resolved: {}", summary.children_resolved);
        println!("Children skipped: {}", summary.children_skipped);
    }
    println!("Records total: {}", summary.records);
    println!("Pagination: {}", summary.termination);
    if let Some(path) = &summary.output_path {
        println!("Output: {path}");
    }
}
