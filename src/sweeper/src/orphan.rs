//! Orphan detection for one relation.
//!
//! ## Classification
//!
//! 1. **Exempt**: the foreign key is absent, null, empty, not a string, or
//!    not a usable document ID. Also children whose parent lookup failed.
//! 2. **Live**: the referenced parent exists.
//! 3. **Orphan**: the parent lookup confirmed the parent is missing.
//!
//! Scanning is read-only; deletions happen later in the batch executor.

use async_trait::async_trait;
use common::DocumentRef;
use common::document::as_document_id;
use common::store::DocumentStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Relation;
use crate::executor::Revalidate;
use crate::metrics::SweepMetrics;
use crate::retry::{RetryPolicy, retry_read};
use crate::scan::{CollectionScan, ScanAborted};

/// A child whose parent was confirmed missing at scan time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanCandidate {
    pub document: DocumentRef,
    pub parent_id: String,
}

/// Result of scanning one relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanScan {
    pub scanned: usize,
    pub exempt: usize,
    pub live: usize,
    pub orphans: Vec<OrphanCandidate>,
    /// Parent lookups that failed; the affected children count as exempt.
    pub errors: Vec<String>,
}

impl OrphanScan {
    pub fn refs(&self) -> Vec<DocumentRef> {
        self.orphans.iter().map(|o| o.document.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParentState {
    Present,
    Missing,
    Unresolved(String),
}

/// Finds children whose referenced parent no longer exists.
pub struct OrphanSweeper {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: SweepMetrics,
}

impl OrphanSweeper {
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

    /// Scan the child collection and classify every document.
    ///
    /// Each distinct parent ID is looked up once per scan.
    ///
    /// # Errors
    ///
    /// Returns [`ScanAborted`] if the child collection cannot be streamed to
    /// the end. Failed parent lookups are not errors here; they are recorded
    /// in [`OrphanScan::errors`].
    pub async fn scan(&self, relation: &Relation) -> Result<OrphanScan, ScanAborted> {
        tracing::info!(
            entry = %relation.name,
            child = %relation.child_collection,
            parent = %relation.parent_collection,
            "Starting orphan scan"
        );

        let mut scan = CollectionScan::open(
            self.store.as_ref(),
            &relation.child_collection,
            &self.retry,
            self.timeout,
            &self.metrics,
        )
        .await?;

        let mut result = OrphanScan::default();
        let mut parents: HashMap<String, ParentState> = HashMap::new();

        while let Some((id, document)) = scan.next().await? {
            let Some(parent_id) = document
                .get(&relation.foreign_key_field)
                .and_then(as_document_id)
            else {
                result.exempt += 1;
                continue;
            };

            let state = match parents.get(parent_id) {
                Some(state) => state.clone(),
                None => {
                    let state = self
                        .lookup_parent(&relation.parent_collection, parent_id)
                        .await;
                    parents.insert(parent_id.to_string(), state.clone());
                    state
                }
            };

            match state {
                ParentState::Present => result.live += 1,
                ParentState::Missing => {
                    tracing::debug!(
                        entry = %relation.name,
                        child = %id,
                        parent = %parent_id,
                        "Orphan found"
                    );
                    result.orphans.push(OrphanCandidate {
                        document: DocumentRef::new(relation.child_collection.clone(), id),
                        parent_id: parent_id.to_string(),
                    });
                }
                ParentState::Unresolved(error) => {
                    result.exempt += 1;
                    result.errors.push(format!(
                        "{}/{}: lookup of parent {}/{} failed: {}",
                        relation.child_collection,
                        id,
                        relation.parent_collection,
                        parent_id,
                        error
                    ));
                }
            }
        }

        result.scanned = scan.scanned();
        self.metrics.record_scanned(result.scanned);
        self.metrics.record_matched(result.orphans.len());

        tracing::info!(
            entry = %relation.name,
            scanned = result.scanned,
            exempt = result.exempt,
            live = result.live,
            orphans = result.orphans.len(),
            parents_checked = parents.len(),
            "Orphan scan complete"
        );

        Ok(result)
    }

    async fn lookup_parent(&self, collection: &str, id: &str) -> ParentState {
        let what = format!("get {collection}/{id}");
        match retry_read(&self.retry, self.timeout, &self.metrics, &what, || {
            self.store.get(collection, id)
        })
        .await
        {
            Ok(Some(_)) => ParentState::Present,
            Ok(None) => ParentState::Missing,
            Err(e) => {
                tracing::warn!(
                    collection,
                    id,
                    error = %e,
                    "Parent lookup failed, leaving children unresolved"
                );
                ParentState::Unresolved(e.to_string())
            }
        }
    }

    /// Revalidation hook that re-fetches each candidate's parent right
    /// before its chunk is deleted.
    pub fn revalidator<'a>(
        &'a self,
        relation: &'a Relation,
        scan: &OrphanScan,
    ) -> ParentRevalidator<'a> {
        ParentRevalidator {
            sweeper: self,
            relation,
            parents: scan
                .orphans
                .iter()
                .map(|o| (o.document.clone(), o.parent_id.clone()))
                .collect(),
        }
    }
}

/// Drops candidates whose parent has reappeared since the scan, and
/// candidates whose parent can no longer be checked.
pub struct ParentRevalidator<'a> {
    sweeper: &'a OrphanSweeper,
    relation: &'a Relation,
    parents: HashMap<DocumentRef, String>,
}

#[async_trait]
impl Revalidate for ParentRevalidator<'_> {
    async fn retain(&self, chunk: Vec<DocumentRef>) -> Vec<DocumentRef> {
        let mut checked: HashMap<&str, ParentState> = HashMap::new();
        let mut kept = Vec::with_capacity(chunk.len());

        for document in chunk {
            let Some(parent_id) = self.parents.get(&document) else {
                continue;
            };
            let state = match checked.get(parent_id.as_str()) {
                Some(state) => state.clone(),
                None => {
                    let state = self
                        .sweeper
                        .lookup_parent(&self.relation.parent_collection, parent_id)
                        .await;
                    checked.insert(parent_id.as_str(), state.clone());
                    state
                }
            };

            match state {
                ParentState::Missing => kept.push(document),
                ParentState::Present => tracing::info!(
                    entry = %self.relation.name,
                    child = %document,
                    parent = %parent_id,
                    "Parent reappeared, keeping child"
                ),
                ParentState::Unresolved(error) => tracing::warn!(
                    entry = %self.relation.name,
                    child = %document,
                    error = %error,
                    "Could not revalidate, keeping child"
                ),
            }
        }

        kept
    }
}
