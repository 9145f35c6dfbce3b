//! Document store adapter contract.
//!
//! The sweeper talks to the external document database only through
//! [`DocumentStore`]. Implementations must make every write idempotent:
//! deleting a missing document or removing an absent field is a success.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::document::{Document, DocumentRef};

pub mod memory;
pub mod object;

pub use memory::InMemoryStore;
pub use object::ObjectDocumentStore;

/// Error types that can occur during store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Store rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid document reference: {0}")]
    InvalidReference(String),

    #[error("Document serialization failed: {0}")]
    Serialization(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Transient errors are worth retrying; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::Unavailable(_) | StoreError::RateLimited(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Lazy, finite scan over one collection.
pub type DocumentStream = BoxStream<'static, StoreResult<(String, Document)>>;

/// Per-reference outcome of a batch write, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub statuses: Vec<StoreResult<()>>,
}

impl BatchOutcome {
    /// Every reference in a batch of `len` succeeded.
    pub fn all_ok(len: usize) -> Self {
        Self {
            statuses: vec![Ok(()); len],
        }
    }

    pub fn success_count(&self) -> usize {
        self.statuses.iter().filter(|s| s.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.statuses.len() - self.success_count()
    }

    pub fn is_complete_success(&self) -> bool {
        self.statuses.iter().all(Result::is_ok)
    }
}

/// Trait that must be implemented by all document store adapters
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send + Sync + 'static {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    /// The store's own per-batch operation ceiling, if any.
    fn max_batch_ops(&self) -> Option<usize> {
        None
    }

    /// Fetch one document. `Ok(None)` means the document does not exist.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Start a fresh scan of every document in `collection`.
    async fn query_all(&self, collection: &str) -> StoreResult<DocumentStream>;

    /// Delete every referenced document.
    async fn batch_delete(&self, refs: &[DocumentRef]) -> StoreResult<BatchOutcome>;

    /// Remove `field` from every referenced document.
    async fn batch_remove_field(&self, refs: &[DocumentRef], field: &str)
    -> StoreResult<BatchOutcome>;
}

/// Run a store call under `limit`, mapping an elapsed timer to
/// [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = vec![
            StoreError::Timeout(Duration::from_secs(1)),
            StoreError::Unavailable("503".to_string()),
            StoreError::RateLimited("quota".to_string()),
        ];
        for error in transient {
            assert!(error.is_transient(), "Should be transient: {error}");
        }

        let permanent = vec![
            StoreError::PermissionDenied("rules".to_string()),
            StoreError::InvalidReference("a/b".to_string()),
            StoreError::Serialization("bad json".to_string()),
            StoreError::Backend("boom".to_string()),
        ];
        for error in permanent {
            assert!(!error.is_transient(), "Should be permanent: {error}");
        }
    }

    #[test]
    fn test_batch_outcome_counts() {
        let outcome = BatchOutcome {
            statuses: vec![
                Ok(()),
                Err(StoreError::PermissionDenied("x".to_string())),
                Ok(()),
            ],
        };

        assert_eq!(outcome.success_count(), 2);
        assert_eq!(outcome.failure_count(), 1);
        assert!(!outcome.is_complete_success());
        assert!(BatchOutcome::all_ok(3).is_complete_success());
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed_timer() {
        let result: StoreResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(StoreError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
