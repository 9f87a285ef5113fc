//! Child-relation expansion.
//!
//! Resolves the child ids referenced by each parent into full records, in
//! sequential batches of concurrent lookups, each lookup bounded by a
//! client-side timeout. Children that fail, time out or come back malformed
//! are skipped with a warning; only a rate-limit circuit trip aborts the run.

use futures::future::join_all;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::expander::progress::ExpansionProgress;
use crate::fetcher::parser::ResponseParser;
use crate::fetcher::resilient::ResilientCaller;
use crate::fetcher::{ContentSource, FetcherError, FetcherResult};
use crate::metrics;
use crate::Record;

/// Operation name used for single-record lookups
const RETRIEVE_OPERATION: &str = "retrieve_page";

/// One parent and the deduplicated child ids to resolve for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionPlan {
    /// The parent record
    pub parent: Record,
    /// Child ids in first-seen order, duplicates removed
    pub child_ids: Vec<String>,
}

impl ExpansionPlan {
    /// Plan the expansion of `parent`.
    pub fn for_parent(parent: Record) -> Self {
        let mut child_ids: Vec<String> = Vec::new();
        for id in parent.child_ids() {
            if !child_ids.contains(&id) {
                child_ids.push(id);
            }
        }
        Self { parent, child_ids }
    }
}

/// Result of [`RelationExpander::expand`].
#[derive(Debug, Clone)]
pub struct ExpansionReport {
    /// Parents in order, each followed by its resolved children in order
    pub records: Vec<Record>,
    /// Parent records expanded
    pub parents: usize,
    /// Children resolved
    pub resolved: usize,
    /// Children skipped after a failed or malformed lookup
    pub failed: usize,
    /// Children skipped after the per-item timeout
    pub timed_out: usize,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl ExpansionReport {
    /// Children omitted from `records`
    pub fn skipped(&self) -> usize {
        self.failed + self.timed_out
    }

    /// Whether any child was omitted
    pub fn is_partial(&self) -> bool {
        self.skipped() > 0
    }
}

/// How one child lookup ended.
#[derive(Debug)]
enum ChildOutcome {
    Resolved(Record),
    Failed(FetcherError),
    Invalid(FetcherError),
    TimedOut,
    CircuitOpen(FetcherError),
}

/// Expands parent records into parents followed by their children.
pub struct RelationExpander {
    caller: Arc<ResilientCaller>,
    source: Arc<dyn ContentSource>,
    batch_size: usize,
    child_timeout: Duration,
    progress_interval: usize,
}

impl RelationExpander {
    /// Create an expander using the batch size, timeout and progress cadence from `config`
    pub fn new(caller: Arc<ResilientCaller>, source: Arc<dyn ContentSource>, config: &SyncConfig) -> Self {
        Self {
            caller,
            source,
            batch_size: config.child_batch_size.max(1),
            child_timeout: config.child_timeout,
            progress_interval: config.progress_interval,
        }
    }

    /// Resolve every parent's children and interleave them in display order.
    ///
    /// Parents are stably sorted by their order key, and so are each parent's
    /// children; records without an order sort last.
    ///
    /// # Errors
    /// [`FetcherError::CircuitOpen`] if the rate-limit circuit opens during the
    /// run. Individual child failures never produce errors.
    pub async fn expand(&self, mut records: Vec<Record>) -> FetcherResult<ExpansionReport> {
        sort_by_order(&mut records);
        let parents = records.len();
        let plans: Vec<ExpansionPlan> = records.into_iter().map(ExpansionPlan::for_parent).collect();

        let total: usize = plans.iter().map(|plan| plan.child_ids.len()).sum();
        let mut progress = ExpansionProgress::new(total, self.progress_interval);

        info!(
            parents = parents,
            children = total,
            batch_size = self.batch_size,
            timeout_ms = self.child_timeout.as_millis() as u64,
            "Expanding child relations"
        );

        let mut output = Vec::with_capacity(parents + total);
        for plan in plans {
            let children = self.resolve_plan(&plan, &mut progress).await?;
            output.push(plan.parent);
            output.extend(children);
        }

        info!(
            resolved = progress.resolved,
            failed = progress.failed,
            timed_out = progress.timed_out,
            success_rate = progress.success_rate(),
            duration_ms = progress.elapsed().as_millis() as u64,
            "{}",
            progress.format_summary()
        );

        Ok(ExpansionReport {
            records: output,
            parents,
            resolved: progress.resolved,
            failed: progress.failed,
            timed_out: progress.timed_out,
            duration: progress.elapsed(),
        })
    }

    /// Resolve one parent's children batch by batch, returning them sorted.
    async fn resolve_plan(
        &self,
        plan: &ExpansionPlan,
        progress: &mut ExpansionProgress,
    ) -> FetcherResult<Vec<Record>> {
        if plan.child_ids.is_empty() {
            return Ok(Vec::new());
        }

        let parent_label = plan.parent.label();
        debug!(
            parent = %plan.parent.id,
            children = plan.child_ids.len(),
            "Resolving sub-pages of '{}'",
            parent_label
        );

        let mut children = Vec::with_capacity(plan.child_ids.len());
        for batch in plan.child_ids.chunks(self.batch_size) {
            let outcomes = join_all(batch.iter().map(|id| self.resolve_child(id))).await;

            for (id, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    ChildOutcome::Resolved(record) => {
                        debug!(child = %id, "Resolved sub-page '{}'", record.label());
                        progress.record_resolved();
                        children.push(record);
                    }
                    ChildOutcome::Failed(err) => {
                        warn!(
                            parent = %plan.parent.id,
                            child = %id,
                            error = %err,
                            "skipping sub-page {} of '{}'",
                            id,
                            parent_label
                        );
                        metrics::record_child_skipped("failed");
                        progress.record_failed();
                    }
                    ChildOutcome::Invalid(err) => {
                        warn!(
                            parent = %plan.parent.id,
                            child = %id,
                            error = %err,
                            "invalid response from {} - skipping sub-page {}",
                            RETRIEVE_OPERATION,
                            id
                        );
                        metrics::record_child_skipped("invalid_response");
                        progress.record_failed();
                    }
                    ChildOutcome::TimedOut => {
                        warn!(
                            parent = %plan.parent.id,
                            child = %id,
                            timeout_ms = self.child_timeout.as_millis() as u64,
                            "skipping sub-page {} - timed out after {:.1} seconds",
                            id,
                            self.child_timeout.as_secs_f64()
                        );
                        metrics::record_child_skipped("timeout");
                        progress.record_timed_out();
                    }
                    ChildOutcome::CircuitOpen(err) => {
                        error!(
                            parent = %plan.parent.id,
                            child = %id,
                            error = %err,
                            "Aborting expansion: rate limit circuit open"
                        );
                        return Err(err);
                    }
                }

                if progress.should_emit_update() {
                    info!("{}", progress.format_progress());
                    progress.mark_emitted();
                }
            }
        }

        sort_by_order(&mut children);
        Ok(children)
    }

    async fn resolve_child(&self, id: &str) -> ChildOutcome {
        let source = &self.source;
        let lookup = self
            .caller
            .call(RETRIEVE_OPERATION, id, || async move { source.retrieve(id).await });

        match tokio::time::timeout(self.child_timeout, lookup).await {
            Err(_) => ChildOutcome::TimedOut,
            Ok(Err(err)) if err.is_circuit_open() => ChildOutcome::CircuitOpen(err),
            Ok(Err(err)) => ChildOutcome::Failed(err),
            Ok(Ok(value)) => match ResponseParser::parse_record(value, RETRIEVE_OPERATION) {
                Ok(record) => ChildOutcome::Resolved(record),
                Err(err) => ChildOutcome::Invalid(err),
            },
        }
    }
}

/// Stable sort by order key; records with an order come first, ascending.
pub fn sort_by_order(records: &mut [Record]) {
    records.sort_by(|a, b| compare_order(a.order(), b.order()));
}

fn compare_order(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
