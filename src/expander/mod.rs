//! Child-relation expansion and display ordering
//!
//! Turns a flat list of parent records into the output document order:
//! each parent followed immediately by its resolved children.
//!
//! # Overview
//!
//! 1. **Ordering**: Parents are stably sorted by their `Order` property, unordered last
//! 2. **Planning**: Each parent's child ids are deduplicated into an [`ExpansionPlan`]
//! 3. **Resolution**: Children are looked up in fixed-size concurrent batches via
//!    [`crate::fetcher::resilient::ResilientCaller`], each under a client-side timeout
//! 4. **Progress**: [`progress::ExpansionProgress`] logs periodic updates and a final summary
//!
//! # Error Handling
//!
//! Per-child failures (errors, timeouts, malformed records) are skipped with a
//! warning and counted in the [`ExpansionReport`]. Only an open rate-limit
//! circuit aborts the whole expansion.
//!
//! # Components
//!
//! - [`relations`] - Planning, batched resolution and interleaving
//! - [`progress`] - Counters and progress formatting

pub mod progress;
pub mod relations;

pub use relations::{sort_by_order, ExpansionPlan, ExpansionReport, RelationExpander};
