//! Deprecated field pruning for one rule.

use common::DocumentRef;
use common::document::has_field;
use common::store::DocumentStore;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::FieldPruneRule;
use crate::metrics::SweepMetrics;
use crate::retry::RetryPolicy;
use crate::scan::{CollectionScan, ScanAborted};

/// Result of scanning one prune rule's collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneScan {
    pub scanned: usize,
    /// Documents that still carry the deprecated field but have no
    /// replacement yet. They are left alone.
    pub exempt: usize,
    pub matched: Vec<DocumentRef>,
}

/// Selects documents that carry both the deprecated and replacement field.
pub struct FieldPruner {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: SweepMetrics,
}

impl FieldPruner {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
        timeout: Duration,
        metrics: SweepMetrics,
    ) -> Self {
        Self {
            store,
            retry,
            timeout,
            metrics,
        }
    }

    pub async fn scan(&self, rule: &FieldPruneRule) -> Result<PruneScan, ScanAborted> {
        tracing::info!(
            entry = %rule.name,
            collection = %rule.collection,
            deprecated = %rule.deprecated_field,
            replacement = %rule.replacement_field,
            "Starting field prune scan"
        );

        let mut scan = CollectionScan::open(
            self.store.as_ref(),
            &rule.collection,
            &self.retry,
            self.timeout,
            &self.metrics,
        )
        .await?;

        let mut result = PruneScan::default();
        while let Some((id, document)) = scan.next().await? {
            if !has_field(&document, &rule.deprecated_field) {
                continue;
            }
            if has_field(&document, &rule.replacement_field) {
                result
                    .matched
                    .push(DocumentRef::new(rule.collection.clone(), id));
            } else {
                result.exempt += 1;
            }
        }

        result.scanned = scan.scanned();
        self.metrics.record_scanned(result.scanned);
        self.metrics.record_matched(result.matched.len());

        tracing::info!(
            entry = %rule.name,
            scanned = result.scanned,
            matched = result.matched.len(),
            exempt = result.exempt,
            "Field prune scan complete"
        );

        Ok(result)
    }
}
