//! Sweep report: per-entry counts, failures and timing for one run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::catalog::{CatalogEntry, EntryKind};
use crate::executor::FailedOperation;
use crate::runner::RunMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Every matched operation was applied.
    Completed,
    /// Finished, but some operations failed or parents could not be checked.
    CompletedWithFailures,
    /// The scan broke off; nothing was committed.
    Failed,
    /// Skipped in whole or in part by cancellation.
    Cancelled,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryStatus::Completed => "completed",
            EntryStatus::CompletedWithFailures => "completed_with_failures",
            EntryStatus::Failed => "failed",
            EntryStatus::Cancelled => "cancelled",
        })
    }
}

/// Outcome of one catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub kind: EntryKind,
    pub collection: String,
    pub status: EntryStatus,
    pub scanned: usize,
    pub exempt: usize,
    pub matched: usize,
    pub applied: usize,
    pub failed: usize,
    pub failures: Vec<FailedOperation>,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl EntryReport {
    pub fn new(entry: &CatalogEntry) -> Self {
        Self {
            name: entry.name().to_string(),
            kind: entry.kind(),
            collection: entry.collection().to_string(),
            status: EntryStatus::Completed,
            scanned: 0,
            exempt: 0,
            matched: 0,
            applied: 0,
            failed: 0,
            failures: Vec::new(),
            skipped: 0,
            errors: Vec::new(),
            duration_ms: 0,
        }
    }

    /// An entry that was never started.
    pub fn cancelled(entry: &CatalogEntry) -> Self {
        Self {
            status: EntryStatus::Cancelled,
            ..Self::new(entry)
        }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn is_clean(&self) -> bool {
        self.status == EntryStatus::Completed
    }
}

/// Sums over all entries of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportTotals {
    pub entries: usize,
    pub scanned: usize,
    pub exempt: usize,
    pub matched: usize,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ReportTotals {
    fn from_entries(entries: &[EntryReport]) -> Self {
        entries.iter().fold(
            Self {
                entries: entries.len(),
                ..Self::default()
            },
            |mut totals, entry| {
                totals.scanned += entry.scanned;
                totals.exempt += entry.exempt;
                totals.matched += entry.matched;
                totals.applied += entry.applied;
                totals.failed += entry.failed;
                totals.skipped += entry.skipped;
                totals.errors += entry.errors.len();
                totals
            },
        )
    }
}

/// Finalized, immutable report of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<EntryReport>,
    pub totals: ReportTotals,
}

impl SweepReport {
    /// True when every entry completed without a single failure.
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(EntryReport::is_clean)
    }

    pub fn was_cancelled(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.status == EntryStatus::Cancelled)
    }

    pub fn entry(&self, name: &str) -> Option<&EntryReport> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Aligned table, one line per entry plus a totals line.
    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

const COLUMNS: [&str; 7] = [
    "SCANNED", "EXEMPT", "MATCHED", "APPLIED", "FAILED", "SKIPPED", "MS",
];

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Sweep {} ({}), {} -> {}",
            self.run_id,
            self.mode,
            self.started_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            self.finished_at.format("%H:%M:%S%.3f UTC")
        )?;

        let name_width = self
            .entries
            .iter()
            .map(|entry| entry.name.len())
            .chain(["ENTRY".len()])
            .max()
            .unwrap_or(5);

        write!(f, "{:<name_width$}  {:<11}  {:<23}", "ENTRY", "KIND", "STATUS")?;
        for column in COLUMNS {
            write!(f, "  {column:>7}")?;
        }
        writeln!(f)?;

        for entry in &self.entries {
            write!(
                f,
                "{:<name_width$}  {:<11}  {:<23}",
                entry.name,
                entry.kind.to_string(),
                entry.status.to_string()
            )?;
            for value in [
                entry.scanned as u64,
                entry.exempt as u64,
                entry.matched as u64,
                entry.applied as u64,
                entry.failed as u64,
                entry.skipped as u64,
                entry.duration_ms,
            ] {
                write!(f, "  {value:>7}")?;
            }
            writeln!(f)?;
        }

        let totals = &self.totals;
        write!(f, "{:<name_width$}  {:<11}  {:<23}", "TOTAL", "", "")?;
        for value in [
            totals.scanned,
            totals.exempt,
            totals.matched,
            totals.applied,
            totals.failed,
            totals.skipped,
        ] {
            write!(f, "  {value:>7}")?;
        }
        writeln!(f)?;

        let failures: Vec<_> = self
            .entries
            .iter()
            .flat_map(|entry| entry.failures.iter().map(move |failure| (&entry.name, failure)))
            .collect();
        if !failures.is_empty() {
            writeln!(f, "\nFailed operations:")?;
            for (name, failure) in failures {
                writeln!(f, "  [{name}] {}: {}", failure.document, failure.reason)?;
            }
        }

        let errors: Vec<_> = self
            .entries
            .iter()
            .flat_map(|entry| entry.errors.iter().map(move |error| (&entry.name, error)))
            .collect();
        if !errors.is_empty() {
            writeln!(f, "\nErrors:")?;
            for (name, error) in errors {
                writeln!(f, "  [{name}] {error}")?;
            }
        }

        Ok(())
    }
}

/// Accumulates entry reports while a run is in progress.
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: Uuid,
    mode: RunMode,
    started_at: DateTime<Utc>,
    entries: Vec<EntryReport>,
}

impl ReportBuilder {
    pub fn new(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn push(&mut self, entry: EntryReport) {
        self.entries.push(entry);
    }

    pub fn finish(self) -> SweepReport {
        let totals = ReportTotals::from_entries(&self.entries);
        SweepReport {
            run_id: self.run_id,
            mode: self.mode,
            started_at: self.started_at,
            finished_at: Utc::now(),
            entries: self.entries,
            totals,
        }
    }
}
