//! Fault-injecting store wrapper.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::document::{Document, DocumentRef};
use crate::store::{BatchOutcome, DocumentStore, DocumentStream, StoreError, StoreResult};

/// Which way an injected failure behaves under retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `StoreError::Unavailable`
    Transient,
    /// `StoreError::PermissionDenied`
    Permanent,
}

impl Fault {
    fn error(self, context: &str) -> StoreError {
        match self {
            Fault::Transient => StoreError::Unavailable(format!("injected: {context}")),
            Fault::Permanent => StoreError::PermissionDenied(format!("injected: {context}")),
        }
    }
}

#[derive(Debug, Default)]
struct FaultState {
    batch_calls: usize,
    batch_sizes: Vec<usize>,
    failing_batch_calls: HashMap<usize, Fault>,
    next_batch_failures: Vec<Fault>,
    failing_refs: HashMap<DocumentRef, (Fault, usize)>,
    failing_scans: HashMap<String, Fault>,
    failing_gets: HashSet<String>,
    get_calls: usize,
}

/// Wraps another store, injecting failures and recording every batch call.
///
/// Batch call numbers are 1-based and count every `batch_delete` /
/// `batch_remove_field` call, retries included.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<dyn DocumentStore>,
    state: Mutex<FaultState>,
    get_delay: Option<Duration>,
    batch_delay: Option<Duration>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            state: Mutex::new(FaultState::default()),
            get_delay: None,
            batch_delay: None,
        }
    }

    /// Fail the `call`-th batch call (1-based) with `fault`.
    pub fn fail_batch_call(self, call: usize, fault: Fault) -> Self {
        self.lock().failing_batch_calls.insert(call, fault);
        self
    }

    /// Fail the next `count` batch calls transiently.
    pub fn fail_next_batches_transiently(self, count: usize) -> Self {
        self.lock()
            .next_batch_failures
            .extend(std::iter::repeat_n(Fault::Transient, count));
        self
    }

    /// Report `fault` for one reference inside otherwise successful batches,
    /// `times` times (use `usize::MAX` for always).
    pub fn fail_ref(self, r: DocumentRef, fault: Fault, times: usize) -> Self {
        self.lock().failing_refs.insert(r, (fault, times));
        self
    }

    /// Fail every scan of `collection`.
    pub fn fail_scan(self, collection: &str, fault: Fault) -> Self {
        self.lock()
            .failing_scans
            .insert(collection.to_string(), fault);
        self
    }

    /// Fail every `get` against `collection` transiently.
    pub fn fail_gets(self, collection: &str) -> Self {
        self.lock().failing_gets.insert(collection.to_string());
        self
    }

    /// Delay every `get`, e.g. to trip the store call timeout.
    pub fn with_get_delay(mut self, delay: Duration) -> Self {
        self.get_delay = Some(delay);
        self
    }

    /// Delay every batch call after it has been recorded. A call that is
    /// abandoned during the delay never reaches the inner store.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    /// Sizes of every batch call that reached this store, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.lock().batch_calls
    }

    pub fn get_calls(&self) -> usize {
        self.lock().get_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FaultState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and returns the injected whole-call fault, if any,
    /// plus the per-ref faults to overlay on a successful outcome.
    fn begin_batch(&self, refs: &[DocumentRef]) -> (Option<Fault>, Vec<Option<Fault>>) {
        let mut state = self.lock();
        state.batch_calls += 1;
        state.batch_sizes.push(refs.len());

        let call = state.batch_calls;
        let whole = match state.failing_batch_calls.get(&call).copied() {
            Some(fault) => Some(fault),
            None if !state.next_batch_failures.is_empty() => {
                Some(state.next_batch_failures.remove(0))
            }
            None => None,
        };
        if whole.is_some() {
            return (whole, Vec::new());
        }

        let per_ref = refs
            .iter()
            .map(|r| match state.failing_refs.get_mut(r) {
                Some((fault, remaining)) if *remaining > 0 => {
                    *remaining = remaining.saturating_sub(1);
                    Some(*fault)
                }
                _ => None,
            })
            .collect();

        (None, per_ref)
    }

    async fn apply_batch(
        &self,
        refs: &[DocumentRef],
        field: Option<&str>,
    ) -> StoreResult<BatchOutcome> {
        let (whole, per_ref) = self.begin_batch(refs);
        if let Some(delay) = self.batch_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = whole {
            let label = match field {
                Some(field) => format!("batch remove {field}"),
                None => "batch delete".to_string(),
            };
            return Err(fault.error(&label));
        }

        let passing: Vec<DocumentRef> = refs
            .iter()
            .zip(&per_ref)
            .filter(|(_, fault)| fault.is_none())
            .map(|(r, _)| r.clone())
            .collect();
        let outcome = match field {
            Some(field) => self.inner.batch_remove_field(&passing, field).await?,
            None => self.inner.batch_delete(&passing).await?,
        };
        let mut applied = outcome.statuses.into_iter();

        let statuses = per_ref
            .into_iter()
            .zip(refs)
            .map(|(fault, r)| match fault {
                Some(fault) => Err(fault.error(&r.to_string())),
                None => applied.next().unwrap_or(Ok(())),
            })
            .collect();

        Ok(BatchOutcome { statuses })
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn name(&self) -> &str {
        "faulty"
    }

    fn max_batch_ops(&self) -> Option<usize> {
        self.inner.max_batch_ops()
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let failing = {
            let mut state = self.lock();
            state.get_calls += 1;
            state.failing_gets.contains(collection)
        };
        if let Some(delay) = self.get_delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(Fault::Transient.error(&format!("get {collection}/{id}")));
        }
        self.inner.get(collection, id).await
    }

    async fn query_all(&self, collection: &str) -> StoreResult<DocumentStream> {
        let fault = self.lock().failing_scans.get(collection).copied();
        if let Some(fault) = fault {
            return Err(fault.error(&format!("scan {collection}")));
        }
        self.inner.query_all(collection).await
    }

    async fn batch_delete(&self, refs: &[DocumentRef]) -> StoreResult<BatchOutcome> {
        self.apply_batch(refs, None).await
    }

    async fn batch_remove_field(
        &self,
        refs: &[DocumentRef],
        field: &str,
    ) -> StoreResult<BatchOutcome> {
        self.apply_batch(refs, Some(field)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_store;
    use serde_json::json;

    fn refs(ids: &[&str]) -> Vec<DocumentRef> {
        ids.iter().map(|id| DocumentRef::new("boxroTalks", *id)).collect()
    }

    #[tokio::test]
    async fn test_whole_batch_failure_leaves_store_untouched() {
        let inner = seeded_store(&[("boxroTalks", "t1", json!({}))]);
        let store = FaultyStore::new(inner.clone()).fail_batch_call(1, Fault::Transient);

        let err = store.batch_delete(&refs(&["t1"])).await.unwrap_err();
        assert!(err.is_transient());
        assert!(inner.contains("boxroTalks", "t1"));

        // Second call goes through
        let outcome = store.batch_delete(&refs(&["t1"])).await.unwrap();
        assert!(outcome.is_complete_success());
        assert!(!inner.contains("boxroTalks", "t1"));
        assert_eq!(store.batch_sizes(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_per_ref_fault_is_overlaid() {
        let inner = seeded_store(&[
            ("boxroTalks", "t1", json!({})),
            ("boxroTalks", "t2", json!({})),
        ]);
        let store = FaultyStore::new(inner.clone()).fail_ref(
            DocumentRef::new("boxroTalks", "t2"),
            Fault::Permanent,
            1,
        );

        let outcome = store.batch_delete(&refs(&["t1", "t2"])).await.unwrap();
        assert!(outcome.statuses[0].is_ok());
        assert!(matches!(
            outcome.statuses[1],
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(!inner.contains("boxroTalks", "t1"));
        assert!(inner.contains("boxroTalks", "t2"));

        // The fault was used up
        let outcome = store.batch_delete(&refs(&["t2"])).await.unwrap();
        assert!(outcome.is_complete_success());
    }

    #[tokio::test]
    async fn test_scan_and_get_faults() {
        let inner = seeded_store(&[("storyArticles", "a1", json!({}))]);
        let store = FaultyStore::new(inner)
            .fail_scan("boxroTalks", Fault::Permanent)
            .fail_gets("storyArticles");

        assert!(store.query_all("boxroTalks").await.is_err());
        assert!(store.get("storyArticles", "a1").await.is_err());
        assert_eq!(store.get_calls(), 1);
    }
}
