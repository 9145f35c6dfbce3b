//! Batch execution
//!
//! Commits an arbitrarily long list of write operations in chunks no larger
//! than the batch ceiling. Chunks are committed strictly one after another;
//! transient failures are retried with exponential backoff and per-reference
//! outcomes are tracked independently.

use async_trait::async_trait;
use common::DocumentRef;
use common::config::Configuration;
use common::store::{BatchOutcome, DocumentStore, StoreError, StoreResult, with_timeout};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::SweepMetrics;
use crate::phase::{Cancellation, PhaseTracker, SweepPhase};
use crate::retry::RetryPolicy;

/// The write applied to every reference of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Delete,
    RemoveField(String),
}

impl WriteOp {
    async fn apply(
        &self,
        store: &dyn DocumentStore,
        refs: &[DocumentRef],
    ) -> StoreResult<BatchOutcome> {
        match self {
            WriteOp::Delete => store.batch_delete(refs).await,
            WriteOp::RemoveField(field) => store.batch_remove_field(refs, field).await,
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Delete => f.write_str("delete"),
            WriteOp::RemoveField(field) => write!(f, "remove field {field}"),
        }
    }
}

/// An operation that was not applied, with the last error seen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOperation {
    pub document: DocumentRef,
    pub reason: String,
}

/// Totals for one `commit` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub planned: usize,
    pub applied: usize,
    pub failed: Vec<FailedOperation>,
    /// Not attempted because the run was cancelled.
    pub skipped: usize,
    /// Removed by revalidation right before their chunk was committed.
    pub dropped: usize,
    pub chunks: usize,
    pub cancelled: bool,
}

impl CommitSummary {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Configuration for batch execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_batch_ops: usize,
    pub retry: RetryPolicy,
    pub store_timeout: Duration,
    /// Plan and log chunks without writing anything.
    pub dry_run: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&Configuration::default())
    }
}

impl From<&Configuration> for ExecutorConfig {
    fn from(config: &Configuration) -> Self {
        Self {
            max_batch_ops: config.sweeper.max_batch_ops,
            retry: RetryPolicy::from(&config.sweeper),
            store_timeout: config.store.timeout,
            dry_run: false,
        }
    }
}

impl ExecutorConfig {
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Re-checks candidates immediately before their chunk is written.
#[async_trait]
pub trait Revalidate: Send + Sync {
    /// The subset of `chunk` that should still be written.
    async fn retain(&self, chunk: Vec<DocumentRef>) -> Vec<DocumentRef>;
}

/// Commits write operations against a document store in bounded chunks
pub struct BatchExecutor {
    store: Arc<dyn DocumentStore>,
    config: ExecutorConfig,
    metrics: SweepMetrics,
    phases: PhaseTracker,
}

impl BatchExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: ExecutorConfig,
        metrics: SweepMetrics,
        phases: PhaseTracker,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            phases,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Effective chunk size: the configured ceiling, lowered to the store's
    /// own limit when it has a smaller one.
    pub fn chunk_size(&self) -> usize {
        let configured = self.config.max_batch_ops.max(1);
        match self.store.max_batch_ops() {
            Some(limit) => configured.min(limit.max(1)),
            None => configured,
        }
    }

    /// Commit `op` for every reference in `refs`.
    ///
    /// Never fails as a whole: every reference ends up applied, failed or
    /// skipped (cancellation), or dropped by `revalidate`.
    pub async fn commit(
        &self,
        entry: &str,
        op: &WriteOp,
        refs: Vec<DocumentRef>,
        cancel: &Cancellation,
        revalidate: Option<&dyn Revalidate>,
    ) -> CommitSummary {
        let mut summary = CommitSummary {
            planned: refs.len(),
            ..Default::default()
        };
        if refs.is_empty() {
            return summary;
        }

        let chunk_size = self.chunk_size();
        let total_chunks = refs.len().div_ceil(chunk_size);
        tracing::info!(
            entry,
            operation = %op,
            operations = refs.len(),
            chunk_size,
            total_chunks,
            dry_run = self.config.dry_run,
            "Committing operations"
        );

        for (index, chunk) in refs.chunks(chunk_size).enumerate() {
            let chunk_no = index + 1;
            if cancel.is_cancelled() {
                let remaining = refs.len() - index * chunk_size;
                tracing::warn!(
                    entry,
                    chunk = chunk_no,
                    skipped = remaining,
                    "Cancelled, skipping remaining chunks"
                );
                summary.skipped += remaining;
                summary.cancelled = true;
                break;
            }

            let chunk = match revalidate {
                Some(revalidate) => {
                    let kept = revalidate.retain(chunk.to_vec()).await;
                    let dropped = chunk.len() - kept.len().min(chunk.len());
                    if dropped > 0 {
                        tracing::info!(
                            entry,
                            chunk = chunk_no,
                            dropped,
                            "Revalidation dropped candidates"
                        );
                    }
                    summary.dropped += dropped;
                    kept
                }
                None => chunk.to_vec(),
            };
            if chunk.is_empty() {
                continue;
            }

            self.phases.set(SweepPhase::Committing {
                entry: entry.to_string(),
                chunk: chunk_no,
            });
            summary.chunks += 1;

            if self.config.dry_run {
                tracing::info!(
                    entry,
                    chunk = chunk_no,
                    total_chunks,
                    operations = chunk.len(),
                    first = %chunk[0],
                    "[DRY-RUN] Would {op}"
                );
                summary.applied += chunk.len();
                self.metrics.record_chunk(chunk.len(), 0);
                continue;
            }

            let (applied, failed) = self.commit_chunk(entry, chunk_no, op, chunk).await;
            tracing::info!(
                entry,
                chunk = chunk_no,
                total_chunks,
                applied,
                failed = failed.len(),
                "Chunk committed"
            );
            self.metrics.record_chunk(applied, failed.len());
            summary.applied += applied;
            summary.failed.extend(failed);
        }

        summary
    }

    /// Commit one chunk, retrying only the references that failed
    /// transiently.
    async fn commit_chunk(
        &self,
        entry: &str,
        chunk_no: usize,
        op: &WriteOp,
        chunk: Vec<DocumentRef>,
    ) -> (usize, Vec<FailedOperation>) {
        let policy = self.config.retry;
        let mut pending = chunk;
        let mut applied = 0;
        let mut failed = Vec::new();
        let mut retries = 0;

        loop {
            let result = with_timeout(
                self.config.store_timeout,
                op.apply(self.store.as_ref(), &pending),
            )
            .await;

            let transient: Vec<(DocumentRef, StoreError)> = match result {
                Ok(outcome) => {
                    let mut statuses = outcome.statuses;
                    if statuses.len() != pending.len() {
                        tracing::warn!(
                            entry,
                            chunk = chunk_no,
                            expected = pending.len(),
                            received = statuses.len(),
                            "Store returned a mismatched number of batch statuses"
                        );
                        let missing = StoreError::Backend(format!(
                            "store returned {} statuses for {} operations",
                            statuses.len(),
                            pending.len()
                        ));
                        statuses.resize(pending.len(), Err(missing));
                    }

                    let mut transient = Vec::new();
                    for (document, status) in pending.into_iter().zip(statuses) {
                        match status {
                            Ok(()) => applied += 1,
                            Err(e) if e.is_transient() => transient.push((document, e)),
                            Err(e) => {
                                tracing::warn!(
                                    entry,
                                    document = %document,
                                    error = %e,
                                    "Operation failed permanently"
                                );
                                failed.push(FailedOperation {
                                    document,
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                    transient
                }
                Err(e) if e.is_transient() => pending.into_iter().map(|r| (r, e.clone())).collect(),
                Err(e) => {
                    tracing::error!(
                        entry,
                        chunk = chunk_no,
                        operations = pending.len(),
                        error = %e,
                        "Chunk failed permanently"
                    );
                    failed.extend(pending.into_iter().map(|document| FailedOperation {
                        document,
                        reason: e.to_string(),
                    }));
                    Vec::new()
                }
            };

            if transient.is_empty() {
                break;
            }

            if !policy.allows(retries) {
                tracing::error!(
                    entry,
                    chunk = chunk_no,
                    operations = transient.len(),
                    retries,
                    "Retry budget exhausted"
                );
                failed.extend(transient.into_iter().map(|(document, e)| FailedOperation {
                    document,
                    reason: format!("{e} (gave up after {retries} retries)"),
                }));
                break;
            }

            retries += 1;
            let delay = policy.delay_for(retries);
            self.phases.set(SweepPhase::Retrying {
                entry: entry.to_string(),
                chunk: chunk_no,
                attempt: retries,
            });
            tracing::warn!(
                entry,
                chunk = chunk_no,
                attempt = retries,
                operations = transient.len(),
                error = %transient[0].1,
                delay = ?delay,
                "Transient commit failure, retrying"
            );
            self.metrics.record_retry();
            tokio::time::sleep(delay).await;

            pending = transient.into_iter().map(|(document, _)| document).collect();
        }

        (applied, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::store::InMemoryStore;
    use common::testing::{Fault, FaultyStore, TestConfigBuilder};

    fn talks(n: usize) -> (Arc<InMemoryStore>, Vec<DocumentRef>) {
        let store = InMemoryStore::new();
        let mut refs = Vec::with_capacity(n);
        for i in 0..n {
            let id = format!("t{i:04}");
            store.insert_json("boxroTalks", &id, serde_json::json!({"articleId": "gone"}));
            refs.push(DocumentRef::new("boxroTalks", id));
        }
        (Arc::new(store), refs)
    }

    fn executor(store: Arc<dyn DocumentStore>, max_batch_ops: usize) -> (BatchExecutor, SweepMetrics) {
        let config = TestConfigBuilder::new()
            .with_max_batch_ops(max_batch_ops)
            .build();
        let metrics = SweepMetrics::new();
        let executor = BatchExecutor::new(
            store,
            ExecutorConfig::from(&config),
            metrics.clone(),
            PhaseTracker::new(),
        );
        (executor, metrics)
    }

    #[tokio::test]
    async fn test_chunks_respect_ceiling() {
        let (inner, refs) = talks(1200);
        let store = Arc::new(FaultyStore::new(inner.clone()));
        let (executor, metrics) = executor(store.clone(), 500);

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs, &Cancellation::new(), None)
            .await;

        assert_eq!(store.batch_sizes(), vec![500, 500, 200]);
        assert_eq!(summary.applied, 1200);
        assert_eq!(summary.chunks, 3);
        assert!(summary.failed.is_empty());
        assert!(inner.is_empty("boxroTalks"));
        assert_eq!(metrics.chunks_committed(), 3);
    }

    #[tokio::test]
    async fn test_store_limit_lowers_chunk_size() {
        let limited = InMemoryStore::new().with_max_batch_ops(2);
        let refs: Vec<DocumentRef> = (0..5)
            .map(|i| DocumentRef::new("boxroTalks", format!("t{i}")))
            .collect();
        for r in &refs {
            limited.insert_json(&r.collection, &r.id, serde_json::json!({}));
        }
        let store = Arc::new(FaultyStore::new(Arc::new(limited)));
        let (executor, _) = executor(store.clone(), 500);
        assert_eq!(executor.chunk_size(), 2);

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs, &Cancellation::new(), None)
            .await;

        assert_eq!(store.batch_sizes(), vec![2, 2, 1]);
        assert_eq!(summary.applied, 5);
    }

    #[tokio::test]
    async fn test_permanent_chunk_failure_moves_on() {
        let (inner, refs) = talks(1200);
        let store = Arc::new(FaultyStore::new(inner.clone()).fail_batch_call(2, Fault::Permanent));
        let (executor, metrics) = executor(store.clone(), 500);

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs, &Cancellation::new(), None)
            .await;

        assert_eq!(store.batch_sizes(), vec![500, 500, 200]);
        assert_eq!(summary.applied, 700);
        assert_eq!(summary.failed_count(), 500);
        assert_eq!(inner.len("boxroTalks"), 500);
        assert_eq!(metrics.retries_attempted(), 0);
        assert!(summary.failed[0].reason.contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_transient_chunk_failure_is_retried() {
        let (inner, refs) = talks(3);
        let store = Arc::new(FaultyStore::new(inner.clone()).fail_next_batches_transiently(2));
        let (executor, metrics) = executor(store.clone(), 500);

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs, &Cancellation::new(), None)
            .await;

        assert_eq!(summary.applied, 3);
        assert!(summary.failed.is_empty());
        assert_eq!(store.batch_calls(), 3);
        assert_eq!(metrics.retries_attempted(), 2);
        assert!(inner.is_empty("boxroTalks"));
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_records_failures() {
        let (inner, refs) = talks(2);
        let store = Arc::new(FaultyStore::new(inner.clone()).fail_next_batches_transiently(10));
        let (executor, metrics) = executor(store.clone(), 500);

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs, &Cancellation::new(), None)
            .await;

        // First attempt plus three retries
        assert_eq!(store.batch_calls(), 4);
        assert_eq!(metrics.retries_attempted(), 3);
        assert_eq!(summary.failed_count(), 2);
        assert!(summary.failed[0].reason.contains("gave up after 3 retries"));
        assert_eq!(inner.len("boxroTalks"), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_retries_only_transient_refs() {
        let (inner, refs) = talks(3);
        let store = Arc::new(
            FaultyStore::new(inner.clone())
                .fail_ref(refs[0].clone(), Fault::Transient, 1)
                .fail_ref(refs[2].clone(), Fault::Permanent, usize::MAX),
        );
        let (executor, _) = executor(store.clone(), 500);

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs.clone(), &Cancellation::new(), None)
            .await;

        assert_eq!(store.batch_sizes(), vec![3, 1]);
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.failed_count(), 1);
        assert_eq!(summary.failed[0].document, refs[2]);
        assert!(inner.contains("boxroTalks", &refs[2].id));
        assert!(!inner.contains("boxroTalks", &refs[0].id));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (inner, refs) = talks(7);
        let store = Arc::new(FaultyStore::new(inner.clone()));
        let config = TestConfigBuilder::new().with_max_batch_ops(3).build();
        let executor = BatchExecutor::new(
            store.clone(),
            ExecutorConfig::from(&config).with_dry_run(true),
            SweepMetrics::new(),
            PhaseTracker::new(),
        );

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs, &Cancellation::new(), None)
            .await;

        assert_eq!(summary.applied, 7);
        assert_eq!(summary.chunks, 3);
        assert_eq!(store.batch_calls(), 0);
        assert_eq!(inner.len("boxroTalks"), 7);
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining_chunks() {
        let (inner, refs) = talks(5);
        let store = Arc::new(FaultyStore::new(inner.clone()));
        let (executor, _) = executor(store.clone(), 2);
        let cancel = Cancellation::new();
        cancel.cancel();

        let summary = executor
            .commit("talks", &WriteOp::Delete, refs, &cancel, None)
            .await;

        assert!(summary.cancelled);
        assert_eq!(summary.skipped, 5);
        assert_eq!(summary.applied, 0);
        assert_eq!(store.batch_calls(), 0);
    }

    struct KeepEven;

    #[async_trait]
    impl Revalidate for KeepEven {
        async fn retain(&self, chunk: Vec<DocumentRef>) -> Vec<DocumentRef> {
            chunk
                .into_iter()
                .filter(|r| r.id.ends_with(['0', '2', '4', '6', '8']))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_revalidation_drops_candidates() {
        let (inner, refs) = talks(4);
        let store = Arc::new(FaultyStore::new(inner.clone()));
        let (executor, _) = executor(store.clone(), 500);

        let summary = executor
            .commit(
                "talks",
                &WriteOp::Delete,
                refs,
                &Cancellation::new(),
                Some(&KeepEven),
            )
            .await;

        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.applied, 2);
        assert_eq!(store.batch_sizes(), vec![2]);
        assert!(inner.contains("boxroTalks", "t0001"));
        assert!(!inner.contains("boxroTalks", "t0002"));
    }

    #[tokio::test]
    async fn test_remove_field_op() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_json(
            "banners",
            "d2",
            serde_json::json!({"thumbnail": "y.png", "cardThumbnail": "y2.png"}),
        );
        let (executor, _) = executor(store.clone(), 500);

        let summary = executor
            .commit(
                "banners",
                &WriteOp::RemoveField("thumbnail".to_string()),
                vec![DocumentRef::new("banners", "d2")],
                &Cancellation::new(),
                None,
            )
            .await;

        assert_eq!(summary.applied, 1);
        let doc = store.document("banners", "d2").unwrap();
        assert!(!doc.contains_key("thumbnail"));
        assert_eq!(doc["cardThumbnail"], "y2.png");
    }
}
