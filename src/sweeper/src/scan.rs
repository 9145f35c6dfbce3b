//! Collection scans shared by the orphan sweeper and the field pruner.

use common::Document;
use common::store::{DocumentStore, DocumentStream, StoreError};
use futures::StreamExt;
use std::time::Duration;

use crate::metrics::SweepMetrics;
use crate::retry::{RetryPolicy, retry_read};

/// A scan that could not be opened or broke off midway. The entry it
/// belongs to is reported as failed and nothing is committed for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("scan of {collection} aborted after {scanned} documents: {source}")]
pub struct ScanAborted {
    pub collection: String,
    pub scanned: usize,
    #[source]
    pub source: StoreError,
}

/// Streams one collection, applying the store timeout to every pull.
pub struct CollectionScan {
    collection: String,
    stream: DocumentStream,
    timeout: Duration,
    scanned: usize,
}

impl CollectionScan {
    /// Open the scan; opening is retried like any other read.
    pub async fn open(
        store: &dyn DocumentStore,
        collection: &str,
        retry: &RetryPolicy,
        timeout: Duration,
        metrics: &SweepMetrics,
    ) -> Result<Self, ScanAborted> {
        let what = format!("scan {collection}");
        let stream = retry_read(retry, timeout, metrics, &what, || store.query_all(collection))
            .await
            .map_err(|source| ScanAborted {
                collection: collection.to_string(),
                scanned: 0,
                source,
            })?;

        Ok(Self {
            collection: collection.to_string(),
            stream,
            timeout,
            scanned: 0,
        })
    }

    /// Next document, or `None` once the collection is exhausted.
    pub async fn next(&mut self) -> Result<Option<(String, Document)>, ScanAborted> {
        let item = match tokio::time::timeout(self.timeout, self.stream.next()).await {
            Ok(item) => item,
            Err(_) => return Err(self.aborted(StoreError::Timeout(self.timeout))),
        };

        match item {
            Some(Ok(document)) => {
                self.scanned += 1;
                Ok(Some(document))
            }
            Some(Err(e)) => Err(self.aborted(e)),
            None => Ok(None),
        }
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }

    fn aborted(&self, source: StoreError) -> ScanAborted {
        ScanAborted {
            collection: self.collection.clone(),
            scanned: self.scanned,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::{Fault, FaultyStore, seeded_store};
    use serde_json::json;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_scan_counts_documents() {
        let store = seeded_store(&[
            ("banners", "d1", json!({"thumbnail": "x.png"})),
            ("banners", "d2", json!({})),
        ]);
        let metrics = SweepMetrics::new();

        let mut scan = CollectionScan::open(
            store.as_ref(),
            "banners",
            &policy(),
            Duration::from_secs(1),
            &metrics,
        )
        .await
        .unwrap();
        let mut ids = Vec::new();
        while let Some((id, _)) = scan.next().await.unwrap() {
            ids.push(id);
        }

        assert_eq!(ids, vec!["d1", "d2"]);
        assert_eq!(scan.scanned(), 2);
    }

    #[tokio::test]
    async fn test_failed_open_is_aborted_scan() {
        let store = FaultyStore::new(seeded_store(&[])).fail_scan("banners", Fault::Transient);
        let metrics = SweepMetrics::new();

        let result = CollectionScan::open(
            &store,
            "banners",
            &policy(),
            Duration::from_secs(1),
            &metrics,
        )
        .await;

        let aborted = result.err().unwrap();
        assert_eq!(aborted.collection, "banners");
        assert!(aborted.source.is_transient());
        // Opening was retried before giving up
        assert_eq!(metrics.retries_attempted(), 2);
    }
}
