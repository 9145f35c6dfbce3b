use async_trait::async_trait;
use futures::stream;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use super::{BatchOutcome, DocumentStore, DocumentStream, StoreError, StoreResult};
use crate::document::{Document, DocumentRef};

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

/// Thread-safe in-memory document store.
///
/// Scans return documents in ID order. An optional batch ceiling makes
/// oversized batches fail the way a managed store would.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<Collections>,
    max_batch_ops: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject batches with more than `limit` operations.
    pub fn with_max_batch_ops(mut self, limit: usize) -> Self {
        self.max_batch_ops = Some(limit);
        self
    }

    /// Insert or replace a document.
    pub fn insert(&self, collection: &str, id: &str, document: Document) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    /// Insert a document given as a JSON value. Non-object values are stored
    /// as an empty document.
    pub fn insert_json(&self, collection: &str, id: &str, value: serde_json::Value) {
        let document = match value {
            serde_json::Value::Object(map) => map,
            _ => Document::new(),
        };
        self.insert(collection, id, document);
    }

    /// Snapshot of one document.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.document(collection, id).is_some()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn check_batch(&self, len: usize) -> StoreResult<()> {
        match self.max_batch_ops {
            Some(limit) if len > limit => Err(StoreError::Backend(format!(
                "batch of {len} operations exceeds the limit of {limit}"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn max_batch_ops(&self) -> Option<usize> {
        self.max_batch_ops
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        Ok(self.document(collection, id))
    }

    async fn query_all(&self, collection: &str) -> StoreResult<DocumentStream> {
        let documents: Vec<StoreResult<(String, Document)>> = self
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, doc)| Ok((id.clone(), doc.clone())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(documents)))
    }

    async fn batch_delete(&self, refs: &[DocumentRef]) -> StoreResult<BatchOutcome> {
        self.check_batch(refs.len())?;

        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for r in refs {
            if let Some(docs) = collections.get_mut(&r.collection) {
                docs.remove(&r.id);
            }
        }

        Ok(BatchOutcome::all_ok(refs.len()))
    }

    async fn batch_remove_field(
        &self,
        refs: &[DocumentRef],
        field: &str,
    ) -> StoreResult<BatchOutcome> {
        self.check_batch(refs.len())?;

        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for r in refs {
            if let Some(doc) = collections
                .get_mut(&r.collection)
                .and_then(|docs| docs.get_mut(&r.id))
            {
                doc.remove(field);
            }
        }

        Ok(BatchOutcome::all_ok(refs.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_and_scan() {
        let store = InMemoryStore::new();
        store.insert_json("storyArticles", "a2", json!({"title": "b"}));
        store.insert_json("storyArticles", "a1", json!({"title": "a"}));

        let doc = store.get("storyArticles", "a1").await.unwrap().unwrap();
        assert_eq!(doc["title"], "a");
        assert!(store.get("storyArticles", "zz").await.unwrap().is_none());
        assert!(store.get("missing", "a1").await.unwrap().is_none());

        let ids: Vec<String> = store
            .query_all("storyArticles")
            .await
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect()
            .await;
        assert_eq!(ids, vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn test_scan_of_unknown_collection_is_empty() {
        let store = InMemoryStore::new();
        let count = store.query_all("nothing").await.unwrap().count().await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryStore::new();
        store.insert_json("boxroTalks", "t1", json!({"articleId": "a1"}));

        let refs = vec![DocumentRef::new("boxroTalks", "t1")];
        let first = store.batch_delete(&refs).await.unwrap();
        let second = store.batch_delete(&refs).await.unwrap();

        assert!(first.is_complete_success());
        assert!(second.is_complete_success());
        assert!(!store.contains("boxroTalks", "t1"));
    }

    #[tokio::test]
    async fn test_remove_field_is_idempotent() {
        let store = InMemoryStore::new();
        store.insert_json(
            "banners",
            "d2",
            json!({"thumbnail": "y.png", "cardThumbnail": "y2.png"}),
        );

        let refs = vec![
            DocumentRef::new("banners", "d2"),
            DocumentRef::new("banners", "gone"),
        ];
        store.batch_remove_field(&refs, "thumbnail").await.unwrap();
        let again = store.batch_remove_field(&refs, "thumbnail").await.unwrap();

        assert_eq!(again.success_count(), 2);
        let doc = store.document("banners", "d2").unwrap();
        assert_eq!(serde_json::Value::Object(doc), json!({"cardThumbnail": "y2.png"}));
    }

    #[tokio::test]
    async fn test_batch_limit_is_enforced() {
        let store = InMemoryStore::new().with_max_batch_ops(2);
        let refs: Vec<DocumentRef> = (0..3)
            .map(|i| DocumentRef::new("c", format!("d{i}")))
            .collect();

        let result = store.batch_delete(&refs).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert!(store.batch_delete(&refs[..2]).await.is_ok());
    }
}
