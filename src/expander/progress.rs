//! Progress tracking for relation expansion.
//!
//! Counts resolved, failed and timed-out children for one expansion run,
//! decides when a periodic progress line is due, and formats the progress
//! and summary strings the expander logs.

use std::time::Duration;
use tokio::time::Instant;

/// Running counters for one expansion run.
#[derive(Debug, Clone)]
pub struct ExpansionProgress {
    /// Children planned across all parents (after per-parent dedup).
    pub total_expected: usize,
    /// Children resolved into records.
    pub resolved: usize,
    /// Children whose resolution failed or returned a malformed record.
    pub failed: usize,
    /// Children that did not settle within the per-item timeout.
    pub timed_out: usize,
    /// When the run started.
    pub start_time: Instant,
    /// Emit a progress line every this many processed children.
    pub update_interval: usize,
    last_reported: usize,
}

impl ExpansionProgress {
    /// Start tracking a run of `total_expected` children.
    pub fn new(total_expected: usize, update_interval: usize) -> Self {
        Self {
            total_expected,
            resolved: 0,
            failed: 0,
            timed_out: 0,
            start_time: Instant::now(),
            update_interval: update_interval.max(1),
            last_reported: 0,
        }
    }

    /// Children processed so far, whatever the outcome.
    pub fn processed(&self) -> usize {
        self.resolved + self.failed + self.timed_out
    }

    /// Children omitted from the output.
    pub fn skipped(&self) -> usize {
        self.failed + self.timed_out
    }

    /// Record a resolved child.
    pub fn record_resolved(&mut self) {
        self.resolved += 1;
    }

    /// Record a failed or malformed child.
    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// Record a child that hit the per-item timeout.
    pub fn record_timed_out(&mut self) {
        self.timed_out += 1;
    }

    /// Whether another `update_interval` children were processed since the last line.
    pub fn should_emit_update(&self) -> bool {
        self.processed() >= self.last_reported + self.update_interval
    }

    /// Call after emitting a progress line.
    pub fn mark_emitted(&mut self) {
        self.last_reported = self.processed();
    }

    /// Percentage of planned children processed (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_expected == 0 {
            return 100.0;
        }
        (self.processed() as f64 / self.total_expected as f64) * 100.0
    }

    /// Percentage of processed children that resolved (0-100).
    pub fn success_rate(&self) -> f64 {
        let processed = self.processed();
        if processed == 0 {
            return 100.0;
        }
        (self.resolved as f64 / processed as f64) * 100.0
    }

    /// Wall-clock time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut line = format!(
            "[PROGRESS] Resolved {}/{} sub-pages - {:.1}% complete",
            self.processed(),
            self.total_expected,
            self.percentage()
        );
        if self.skipped() > 0 {
            line.push_str(&format!(" ({} skipped)", self.skipped()));
        }
        line
    }

    /// Final summary line.
    pub fn format_summary(&self) -> String {
        format!(
            "Expansion complete: {}/{} sub-pages resolved ({:.1}% success, {} failed, {} timed out) in {}",
            self.resolved,
            self.total_expected,
            self.success_rate(),
            self.failed,
            self.timed_out,
            format_duration(self.elapsed())
        )
    }
}

/// Format a duration as a compact human string (e.g. "1m 05s", "3.2s").
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
