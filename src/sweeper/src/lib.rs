//! docsweep sweeper library
//!
//! Reference-integrity sweeping over a schemaless document store:
//! - Orphan detection for child -> parent relations
//! - Pruning of deprecated fields once their replacement is set
//! - Chunked, retried batch commits with dry-run and report-only modes
//! - Per-entry reports and process-local metrics

pub mod catalog;
pub mod executor;
pub mod metrics;
pub mod orphan;
pub mod phase;
pub mod prune;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scan;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogEntry, CatalogError, EntryKind, FieldPruneRule, Relation};
pub use executor::{
    BatchExecutor, CommitSummary, ExecutorConfig, FailedOperation, Revalidate, WriteOp,
};
pub use metrics::{MetricsSummary, SweepMetrics};
pub use orphan::{OrphanCandidate, OrphanScan, OrphanSweeper};
pub use phase::{Cancellation, PhaseTracker, SweepPhase};
pub use prune::{FieldPruner, PruneScan};
pub use report::{EntryReport, EntryStatus, ReportTotals, SweepReport};
pub use retry::RetryPolicy;
pub use runner::{RunMode, SweepError, SweepRunner};
pub use scan::ScanAborted;
