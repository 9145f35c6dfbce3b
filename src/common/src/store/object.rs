//! Document store backed by any `object_store` backend.
//!
//! Layout: `{prefix}/{collection}/{id}.json`, one JSON object per document.
//! Object stores have no multi-object transactions, so batches are applied
//! one document at a time and report a status per reference.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, future};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use percent_encoding::percent_decode_str;
use std::sync::Arc;

use super::{BatchOutcome, DocumentStore, DocumentStream, StoreError, StoreResult};
use crate::document::{Document, DocumentRef, is_valid_document_id};

const DOCUMENT_SUFFIX: &str = ".json";

#[derive(Debug)]
pub struct ObjectDocumentStore {
    object_store: Arc<dyn ObjectStore>,
    prefix: Option<ObjectPath>,
    name: String,
}

impl ObjectDocumentStore {
    pub fn new(object_store: Arc<dyn ObjectStore>, scheme: impl AsRef<str>, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        Self {
            object_store,
            prefix: (!prefix.is_empty()).then(|| ObjectPath::from(prefix)),
            name: format!("object:{}", scheme.as_ref()),
        }
    }

    fn collection_path(&self, collection: &str) -> ObjectPath {
        match &self.prefix {
            Some(prefix) => prefix.child(collection),
            None => ObjectPath::from_iter([collection]),
        }
    }

    fn document_path(&self, collection: &str, id: &str) -> StoreResult<ObjectPath> {
        if !is_valid_document_id(id) {
            return Err(StoreError::InvalidReference(format!("{collection}/{id}")));
        }
        Ok(self
            .collection_path(collection)
            .child(format!("{id}{DOCUMENT_SUFFIX}")))
    }

    async fn read_document(&self, path: &ObjectPath) -> StoreResult<Option<Document>> {
        match self.object_store.get(path).await {
            Ok(result) => {
                let bytes = result.bytes().await.map_err(map_object_store_error)?;
                Ok(Some(parse_document(&bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_object_store_error(e)),
        }
    }

    async fn delete_one(&self, r: &DocumentRef) -> StoreResult<()> {
        let path = self.document_path(&r.collection, &r.id)?;
        match self.object_store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_object_store_error(e)),
        }
    }

    async fn remove_field_one(&self, r: &DocumentRef, field: &str) -> StoreResult<()> {
        let path = self.document_path(&r.collection, &r.id)?;
        let Some(mut document) = self.read_document(&path).await? else {
            return Ok(());
        };
        if document.remove(field).is_none() {
            return Ok(());
        }

        let body = serde_json::to_vec(&document)?;
        self.object_store
            .put(&path, PutPayload::from(Bytes::from(body)))
            .await
            .map_err(map_object_store_error)?;
        Ok(())
    }

    /// Write a document. Used to seed stores; the sweeper never creates
    /// documents.
    pub async fn put_document(
        &self,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> StoreResult<()> {
        let path = self.document_path(collection, id)?;
        let body = serde_json::to_vec(document)?;
        self.object_store
            .put(&path, PutPayload::from(Bytes::from(body)))
            .await
            .map_err(map_object_store_error)?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for ObjectDocumentStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let path = self.document_path(collection, id)?;
        self.read_document(&path).await
    }

    async fn query_all(&self, collection: &str) -> StoreResult<DocumentStream> {
        let collection_path = self.collection_path(collection);
        let depth = collection_path.parts().count() + 1;
        let list_prefix = collection_path.clone();
        let object_store = Arc::clone(&self.object_store);

        let stream = self
            .object_store
            .list(Some(&list_prefix))
            .filter_map(move |meta| {
                // Direct children ending in .json only; nested paths are not
                // documents of this collection.
                let item = match meta {
                    Ok(meta) => {
                        let is_document = meta.location.parts().count() == depth
                            && meta
                                .location
                                .filename()
                                .is_some_and(|name| name.ends_with(DOCUMENT_SUFFIX));
                        is_document.then_some(Ok(meta.location))
                    }
                    Err(e) => Some(Err(map_object_store_error(e))),
                };
                future::ready(item)
            })
            .then(move |location| {
                fetch_listed_document(
                    Arc::clone(&object_store),
                    collection_path.clone(),
                    location,
                )
            })
            .filter_map(|item| future::ready(item.transpose()));

        Ok(stream.boxed())
    }

    async fn batch_delete(&self, refs: &[DocumentRef]) -> StoreResult<BatchOutcome> {
        let mut statuses = Vec::with_capacity(refs.len());
        for r in refs {
            statuses.push(self.delete_one(r).await);
        }
        Ok(BatchOutcome { statuses })
    }

    async fn batch_remove_field(
        &self,
        refs: &[DocumentRef],
        field: &str,
    ) -> StoreResult<BatchOutcome> {
        let mut statuses = Vec::with_capacity(refs.len());
        for r in refs {
            statuses.push(self.remove_field_one(r, field).await);
        }
        Ok(BatchOutcome { statuses })
    }
}

async fn fetch_listed_document(
    object_store: Arc<dyn ObjectStore>,
    collection_path: ObjectPath,
    location: StoreResult<ObjectPath>,
) -> StoreResult<Option<(String, Document)>> {
    let location = location?;
    let id = document_id_from_location(&collection_path, &location)?;

    match object_store.get(&location).await {
        Ok(result) => {
            let bytes = result.bytes().await.map_err(map_object_store_error)?;
            Ok(Some((id, parse_document(&bytes)?)))
        }
        // Deleted between listing and reading
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(map_object_store_error(e)),
    }
}

/// Recover the document ID from a listed object path.
///
/// Path parts are percent-encoded (`t~1` is stored as `t%7E1.json`), so the
/// file name is decoded and the ID must map back onto the exact listed path.
/// Anything else would make later writes address a different object.
fn document_id_from_location(
    collection_path: &ObjectPath,
    location: &ObjectPath,
) -> StoreResult<String> {
    let invalid = || StoreError::InvalidReference(location.to_string());

    let encoded = location
        .filename()
        .and_then(|name| name.strip_suffix(DOCUMENT_SUFFIX))
        .ok_or_else(invalid)?;
    let id = percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|_| invalid())?
        .into_owned();

    let rebuilt = collection_path.child(format!("{id}{DOCUMENT_SUFFIX}"));
    if !is_valid_document_id(&id) || &rebuilt != location {
        return Err(invalid());
    }
    Ok(id)
}

fn parse_document(bytes: &[u8]) -> StoreResult<Document> {
    match serde_json::from_slice::<serde_json::Value>(bytes)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "expected a JSON object, found {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Map object store failures onto the sweeper's transient/permanent split.
fn map_object_store_error(error: object_store::Error) -> StoreError {
    match error {
        object_store::Error::PermissionDenied { path, .. }
        | object_store::Error::Unauthenticated { path, .. } => {
            StoreError::PermissionDenied(path)
        }
        object_store::Error::InvalidPath { source } => {
            StoreError::InvalidReference(source.to_string())
        }
        object_store::Error::NotSupported { source } => StoreError::Backend(source.to_string()),
        object_store::Error::NotImplemented => {
            StoreError::Backend("operation not implemented by backend".to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}
