//! Document and reference types shared by the store adapters and the sweeper.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A schemaless document body. Documents are owned by the store; the
/// sweeper only inspects individual fields.
pub type Document = serde_json::Map<String, Value>;

/// Names one document in one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Returns true when `field` exists on the document with a non-null value.
pub fn has_field(document: &Document, field: &str) -> bool {
    !matches!(document.get(field), None | Some(Value::Null))
}

/// Interpret a field value as a document ID.
///
/// Only non-empty strings that could name a single document qualify.
/// Everything else (numbers, objects, arrays, booleans, `/`-separated
/// paths) yields `None`.
pub fn as_document_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) if is_valid_document_id(id) => Some(id.as_str()),
        _ => None,
    }
}

/// Document IDs must be non-blank, must not contain `/` and must not be a
/// relative path component.
pub fn is_valid_document_id(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains('/') && id != "." && id != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_has_field_treats_null_as_absent() {
        let d = doc(json!({"thumbnail": "x.png", "cardThumbnail": null}));

        assert!(has_field(&d, "thumbnail"));
        assert!(!has_field(&d, "cardThumbnail"));
        assert!(!has_field(&d, "missing"));
    }

    #[test]
    fn test_has_field_accepts_empty_string() {
        let d = doc(json!({"cardThumbnail": ""}));
        assert!(has_field(&d, "cardThumbnail"));
    }

    #[test]
    fn test_as_document_id() {
        assert_eq!(as_document_id(&json!("a1")), Some("a1"));
        assert_eq!(as_document_id(&json!("")), None);
        assert_eq!(as_document_id(&json!("   ")), None);
        assert_eq!(as_document_id(&json!("storyArticles/a1")), None);
        assert_eq!(as_document_id(&json!("..")), None);
        assert_eq!(as_document_id(&json!(42)), None);
        assert_eq!(as_document_id(&json!({"id": "a1"})), None);
        assert_eq!(as_document_id(&json!(["a1"])), None);
        assert_eq!(as_document_id(&Value::Null), None);
    }

    #[test]
    fn test_document_ref_display() {
        let r = DocumentRef::new("boxroTalks", "t2");
        assert_eq!(r.to_string(), "boxroTalks/t2");
    }
}
