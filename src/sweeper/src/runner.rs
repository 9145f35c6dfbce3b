//! Run orchestration
//!
//! Walks the catalog strictly in order: each entry is scanned, its matches
//! are committed through the batch executor, and its outcome is added to
//! the report before the next entry starts. One entry failing never stops
//! the run.

use clap::ValueEnum;
use common::config::Configuration;
use common::store::DocumentStore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::catalog::{Catalog, CatalogEntry, CatalogError, FieldPruneRule, Relation};
use crate::executor::{BatchExecutor, CommitSummary, ExecutorConfig, Revalidate, WriteOp};
use crate::metrics::SweepMetrics;
use crate::orphan::OrphanSweeper;
use crate::phase::{Cancellation, PhaseTracker, SweepPhase};
use crate::prune::FieldPruner;
use crate::report::{EntryReport, EntryStatus, ReportBuilder, SweepReport};
use crate::retry::RetryPolicy;
use crate::scan::ScanAborted;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Scan and commit.
    Sweep,
    /// Scan and plan chunks, but write nothing.
    DryRun,
    /// Scan and classify only.
    ReportOnly,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Sweep => "sweep",
            RunMode::DryRun => "dry-run",
            RunMode::ReportOnly => "report-only",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Invalid catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Runs the catalog against one document store.
pub struct SweepRunner {
    store: Arc<dyn DocumentStore>,
    catalog: Catalog,
    executor_config: ExecutorConfig,
    revalidate_before_delete: bool,
    metrics: SweepMetrics,
    phases: PhaseTracker,
}

impl SweepRunner {
    pub fn new(store: Arc<dyn DocumentStore>, catalog: Catalog, config: &Configuration) -> Self {
        Self {
            store,
            catalog,
            executor_config: ExecutorConfig::from(config),
            revalidate_before_delete: config.sweeper.revalidate_before_delete,
            metrics: SweepMetrics::new(),
            phases: PhaseTracker::new(),
        }
    }

    /// Validate `config`, build its catalog and restrict it to `only`
    /// (everything when empty).
    pub fn from_config(
        store: Arc<dyn DocumentStore>,
        config: &Configuration,
        only: &[String],
    ) -> Result<Self, SweepError> {
        config
            .validate()
            .map_err(|e| SweepError::Config(format!("{e:#}")))?;
        let catalog = Catalog::from_config(&config.catalog)?.select(only)?;
        Ok(Self::new(store, catalog, config))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    pub fn phases(&self) -> &PhaseTracker {
        &self.phases
    }

    pub fn phase(&self) -> SweepPhase {
        self.phases.current()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.executor_config.retry
    }

    fn store_timeout(&self) -> Duration {
        self.executor_config.store_timeout
    }

    /// Run every catalog entry once and return the finalized report.
    pub async fn run(&self, mode: RunMode, cancel: &Cancellation) -> SweepReport {
        let mut report = ReportBuilder::new(mode);
        let executor = BatchExecutor::new(
            Arc::clone(&self.store),
            self.executor_config
                .clone()
                .with_dry_run(mode == RunMode::DryRun),
            self.metrics.clone(),
            self.phases.clone(),
        );
        let orphans = OrphanSweeper::new(
            Arc::clone(&self.store),
            self.retry_policy(),
            self.store_timeout(),
            self.metrics.clone(),
        );
        let pruner = FieldPruner::new(
            Arc::clone(&self.store),
            self.retry_policy(),
            self.store_timeout(),
            self.metrics.clone(),
        );

        tracing::info!(
            run_id = %report.run_id(),
            mode = %mode,
            store = self.store.name(),
            entries = self.catalog.len(),
            chunk_size = executor.chunk_size(),
            "Starting sweep run"
        );

        for entry in self.catalog.entries() {
            if cancel.is_cancelled() {
                tracing::warn!(entry = entry.name(), "Cancelled before entry started");
                report.push(EntryReport::cancelled(entry));
                continue;
            }

            let started = Instant::now();
            self.phases.set(SweepPhase::Scanning {
                entry: entry.name().to_string(),
            });

            let mut entry_report = EntryReport::new(entry);
            match entry {
                CatalogEntry::Relation(relation) => {
                    self.sweep_relation(
                        relation,
                        &orphans,
                        &executor,
                        mode,
                        cancel,
                        &mut entry_report,
                    )
                    .await
                }
                CatalogEntry::FieldPrune(rule) => {
                    self.prune_fields(
                        rule,
                        &pruner,
                        &executor,
                        mode,
                        cancel,
                        &mut entry_report,
                    )
                    .await
                }
            }
            entry_report.set_duration(started.elapsed());

            self.phases.set(SweepPhase::Reported {
                entry: entry.name().to_string(),
            });
            self.metrics.record_entry();
            tracing::info!(
                entry = %entry_report.name,
                status = %entry_report.status,
                scanned = entry_report.scanned,
                matched = entry_report.matched,
                applied = entry_report.applied,
                failed = entry_report.failed,
                skipped = entry_report.skipped,
                duration_ms = entry_report.duration_ms,
                "Entry finished"
            );
            report.push(entry_report);
        }

        self.phases.set(SweepPhase::Done);
        let report = report.finish();
        self.metrics.summary().log();
        tracing::info!(
            run_id = %report.run_id,
            clean = report.is_clean(),
            applied = report.totals.applied,
            failed = report.totals.failed,
            "Sweep run finished"
        );
        report
    }

    async fn sweep_relation(
        &self,
        relation: &Relation,
        orphans: &OrphanSweeper,
        executor: &BatchExecutor,
        mode: RunMode,
        cancel: &Cancellation,
        report: &mut EntryReport,
    ) {
        let scan = match orphans.scan(relation).await {
            Ok(scan) => scan,
            Err(aborted) => return record_aborted_scan(report, aborted),
        };

        report.scanned = scan.scanned;
        report.exempt = scan.exempt;
        report.matched = scan.orphans.len();
        report.errors.extend(scan.errors.iter().cloned());

        self.phases.set(SweepPhase::Collecting {
            entry: relation.name.clone(),
        });
        if mode == RunMode::ReportOnly {
            settle_status(report, false);
            return;
        }

        let revalidator = self
            .revalidate_before_delete
            .then(|| orphans.revalidator(relation, &scan));
        let summary = executor
            .commit(
                &relation.name,
                &WriteOp::Delete,
                scan.refs(),
                cancel,
                revalidator.as_ref().map(|r| r as &dyn Revalidate),
            )
            .await;
        record_commit(report, summary);
    }

    async fn prune_fields(
        &self,
        rule: &FieldPruneRule,
        pruner: &FieldPruner,
        executor: &BatchExecutor,
        mode: RunMode,
        cancel: &Cancellation,
        report: &mut EntryReport,
    ) {
        let scan = match pruner.scan(rule).await {
            Ok(scan) => scan,
            Err(aborted) => return record_aborted_scan(report, aborted),
        };

        report.scanned = scan.scanned;
        report.exempt = scan.exempt;
        report.matched = scan.matched.len();

        self.phases.set(SweepPhase::Collecting {
            entry: rule.name.clone(),
        });
        if mode == RunMode::ReportOnly {
            settle_status(report, false);
            return;
        }

        let summary = executor
            .commit(
                &rule.name,
                &WriteOp::RemoveField(rule.deprecated_field.clone()),
                scan.matched,
                cancel,
                None,
            )
            .await;
        record_commit(report, summary);
    }
}

fn record_aborted_scan(report: &mut EntryReport, aborted: ScanAborted) {
    tracing::error!(entry = %report.name, error = %aborted, "Scan failed, skipping entry");
    report.scanned = aborted.scanned;
    report.errors.push(aborted.to_string());
    report.status = EntryStatus::Failed;
}

fn record_commit(report: &mut EntryReport, summary: CommitSummary) {
    report.matched = report.matched.saturating_sub(summary.dropped);
    report.applied = summary.applied;
    report.failed = summary.failed.len();
    report.failures = summary.failed;
    report.skipped = summary.skipped;
    settle_status(report, summary.cancelled);
}

fn settle_status(report: &mut EntryReport, cancelled: bool) {
    report.status = if cancelled {
        EntryStatus::Cancelled
    } else if report.failed > 0 || !report.errors.is_empty() {
        EntryStatus::CompletedWithFailures
    } else {
        EntryStatus::Completed
    };
}
