use anyhow::Result;
use object_store::{ObjectStore, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory};
use std::sync::Arc;
use url::Url;

use crate::config::{StoreConfig, redact_dsn};
use crate::store::{DocumentStore, ObjectDocumentStore};

/// Open the document store described by the store configuration.
///
/// Every supported DSN scheme is served by [`ObjectDocumentStore`] on top of
/// the matching object store backend.
pub fn open_document_store(store_config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    if store_config.has_unused_credential() {
        log::warn!(
            "Ignoring the configured store credential: it is only used as the secret key of an \
             s3:// DSN that names an access key without a password ({})",
            store_config.redacted_dsn()
        );
    }
    let object_store = create_object_store(store_config)?;
    let scheme = Url::parse(&store_config.dsn)
        .map(|url| url.scheme().to_string())
        .unwrap_or_default();

    log::debug!(
        "Opening document store scheme={} prefix={:?} project={:?}",
        scheme,
        store_config.prefix,
        store_config.project_id
    );

    Ok(Arc::new(ObjectDocumentStore::new(
        object_store,
        scheme,
        &store_config.prefix,
    )))
}

/// Create an object store from store configuration
pub fn create_object_store(store_config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_with_credential(&store_config.dsn, store_config.credential.as_deref())
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>> {
    create_object_store_with_credential(dsn, None)
}

fn create_object_store_with_credential(
    dsn: &str,
    credential: Option<&str>,
) -> Result<Arc<dyn ObjectStore>> {
    let url = Url::parse(dsn)
        .map_err(|e| anyhow::anyhow!("Invalid storage DSN '{}': {}", redact_dsn(dsn), e))?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(anyhow::anyhow!(
                    "File DSN must specify a path: file:///path/to/documents"
                ));
            }
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url, credential)?;
            Ok(Arc::new(builder.build()?))
        }
        scheme => Err(anyhow::anyhow!(
            "Unsupported storage scheme: {}. Supported: file, memory, s3",
            scheme
        )),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key[:secret_key]@]host[:port]/bucket
///
/// When the DSN names an access key without a secret, the configured
/// service credential is used as the secret.
pub fn create_s3_builder_from_dsn(dsn: &Url, credential: Option<&str>) -> Result<AmazonS3Builder> {
    let host = dsn
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("Missing S3 host in DSN"))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(anyhow::anyhow!(
            "S3 DSN must specify a bucket: s3://host/bucket"
        ));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().or(credential).unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // S3-compatible stores (MinIO etc.) need an explicit endpoint
    if !host.contains("amazonaws.com") {
        let scheme = if port == Some(443) { "https" } else { "http" };
        let endpoint = match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        };
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false);
    }

    if access_key.is_empty() {
        if let Ok(env_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(env_key);
        }
        if let Ok(env_secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(env_secret);
        }
        if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(env_region);
        }
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_object_store() {
        let object_store = create_object_store_from_dsn("memory://").unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_create_filesystem_object_store() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_string_lossy();
        let dsn = format!("file://{path}");

        let object_store = create_object_store_from_dsn(&dsn).unwrap();
        assert!(Arc::strong_count(&object_store) == 1);
    }

    #[test]
    fn test_open_document_store_from_config() {
        let store_config = StoreConfig::default();

        let store = open_document_store(&store_config).unwrap();
        assert_eq!(store.name(), "object:memory");
    }

    #[test]
    fn test_invalid_dsn() {
        let result = create_object_store_from_dsn("not-a-url");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid storage DSN")
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = create_object_store_from_dsn("firestore://project/db");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Unsupported storage scheme")
        );
    }

    #[test]
    fn test_s3_dsn_parsing() {
        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://mybucket.s3.amazonaws.com/docs").unwrap(),
            None,
        );
        assert!(result.is_ok());

        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://access:secret@localhost:9000/bucket").unwrap(),
            None,
        );
        assert!(result.is_ok());

        // Secret supplied through the service credential
        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://access@localhost:9000/bucket").unwrap(),
            Some("from-env"),
        );
        assert!(result.is_ok());

        let result =
            create_s3_builder_from_dsn(&Url::parse("s3://localhost:9000/").unwrap(), None);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must specify a bucket")
        );
    }

    #[test]
    fn test_file_dsn_without_path() {
        let result = create_object_store_from_dsn("file://");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("File DSN must specify a path")
        );
    }
}
