use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use object_store::path::Path as ObjectPath;
use object_store::{
    ObjectStore, PutPayload, aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory,
};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::config::StorageConfig;
use crate::error::ConnectionError;
use crate::model::ObjectRef;

/// Stream of object content chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object store error for {location}: {source}")]
    ObjectStore {
        location: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Storage error: {0}")]
    Other(String),
}

impl StorageError {
    fn from_object_store(object: &ObjectRef, source: object_store::Error) -> Self {
        match source {
            object_store::Error::NotFound { .. } => StorageError::NotFound(object.to_string()),
            source => StorageError::ObjectStore {
                location: object.to_string(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Generic object read/write/delete capability.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stream the content of an object.
    async fn get(&self, object: &ObjectRef) -> Result<ByteStream, StorageError>;

    /// Replace or create an object in a single atomic write.
    async fn put(&self, object: &ObjectRef, body: Bytes) -> Result<(), StorageError>;

    /// Delete an object. Deleting an absent object succeeds.
    async fn delete(&self, object: &ObjectRef) -> Result<(), StorageError>;
}

/// Read a whole object into memory.
pub async fn read_all(storage: &dyn Storage, object: &ObjectRef) -> Result<Vec<u8>, StorageError> {
    let mut stream = storage.get(object).await?;
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// [`Storage`] backed by `object_store`, routing each bucket to a store.
///
/// Buckets without a dedicated store live in the default store under a
/// `<bucket>/` prefix.
#[derive(Debug, Clone)]
pub struct ObjectStoreRouter {
    default: Arc<dyn ObjectStore>,
    buckets: HashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStoreRouter {
    pub fn new(default: Arc<dyn ObjectStore>) -> Self {
        Self {
            default,
            buckets: HashMap::new(),
        }
    }

    /// Router over a single in-memory store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.buckets.insert(bucket.into(), store);
        self
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, ConnectionError> {
        let mut router = Self::new(create_object_store_from_dsn(&config.default)?);
        for (bucket, adapter) in &config.buckets {
            router = router.with_bucket(bucket, create_object_store_from_dsn(&adapter.dsn)?);
        }
        Ok(router)
    }

    fn resolve(&self, object: &ObjectRef) -> (&Arc<dyn ObjectStore>, ObjectPath) {
        match self.buckets.get(object.bucket()) {
            Some(store) => (store, ObjectPath::from(object.key())),
            None => (
                &self.default,
                ObjectPath::from(format!("{}/{}", object.bucket(), object.key())),
            ),
        }
    }
}

#[async_trait]
impl Storage for ObjectStoreRouter {
    async fn get(&self, object: &ObjectRef) -> Result<ByteStream, StorageError> {
        let (store, path) = self.resolve(object);
        let result = store
            .get(&path)
            .await
            .map_err(|e| StorageError::from_object_store(object, e))?;

        let owned = object.clone();
        Ok(result
            .into_stream()
            .map(move |chunk| chunk.map_err(|e| StorageError::from_object_store(&owned, e)))
            .boxed())
    }

    async fn put(&self, object: &ObjectRef, body: Bytes) -> Result<(), StorageError> {
        let (store, path) = self.resolve(object);
        store
            .put(&path, PutPayload::from(body))
            .await
            .map_err(|e| StorageError::from_object_store(object, e))?;
        Ok(())
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), StorageError> {
        let (store, path) = self.resolve(object);
        match store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(location = %object, "Object already absent");
                Ok(())
            }
            Err(e) => Err(StorageError::from_object_store(object, e)),
        }
    }
}

/// Create an object store from a DSN string
pub fn create_object_store_from_dsn(dsn: &str) -> Result<Arc<dyn ObjectStore>, ConnectionError> {
    let url = Url::parse(dsn).map_err(|e| ConnectionError::StorageDsn {
        dsn: dsn.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(ConnectionError::StorageDsn {
                    dsn: dsn.to_string(),
                    reason: "File DSN must specify a path: file:///path/to/storage".to_string(),
                });
            }
            // /.data/objects -> .data/objects, /tmp/data stays absolute
            let path = if path.starts_with("/.") {
                &path[1..]
            } else {
                path
            };
            std::fs::create_dir_all(path).map_err(|e| ConnectionError::StorageDsn {
                dsn: dsn.to_string(),
                reason: format!("cannot create storage directory: {e}"),
            })?;
            let store = LocalFileSystem::new_with_prefix(path).map_err(|source| {
                ConnectionError::ObjectStore {
                    dsn: dsn.to_string(),
                    source,
                }
            })?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(InMemory::new())),
        "s3" => {
            let builder = create_s3_builder_from_dsn(&url).map_err(|reason| {
                ConnectionError::StorageDsn {
                    dsn: dsn.to_string(),
                    reason,
                }
            })?;
            let store = builder.build().map_err(|source| ConnectionError::ObjectStore {
                dsn: dsn.to_string(),
                source,
            })?;
            Ok(Arc::new(store))
        }
        scheme => Err(ConnectionError::StorageDsn {
            dsn: dsn.to_string(),
            reason: format!("Unsupported storage scheme: {scheme}. Supported: file, memory, s3"),
        }),
    }
}

/// Create an S3 builder from a DSN
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<AmazonS3Builder, String> {
    let host = dsn
        .host_str()
        .ok_or_else(|| "Missing S3 host in DSN".to_string())?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err("S3 DSN must specify a bucket: s3://host/bucket".to_string());
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1");

    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Real S3 needs no custom endpoint; MinIO and friends do
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
    use crate::config::BucketConfig;

    fn object(uri: &str) -> ObjectRef {
        ObjectRef::parse(uri).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = ObjectStoreRouter::in_memory();
        let target = object("s3://bucket/42-a.json");

        storage
            .put(&target, Bytes::from_static(b"{\"a\":1}\n"))
            .await
            .unwrap();
        assert_eq!(read_all(&storage, &target).await.unwrap(), b"{\"a\":1}\n");

        storage.delete(&target).await.unwrap();
        let err = read_all(&storage, &target).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_absent_object_succeeds_on_filesystem() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dsn = format!("file://{}", temp_dir.path().to_string_lossy());
        let storage = ObjectStoreRouter::new(create_object_store_from_dsn(&dsn).unwrap());

        storage
            .delete(&object("s3://bucket/missing.json"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bucket_routing() {
        let reports: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let default: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let storage =
            ObjectStoreRouter::new(default.clone()).with_bucket("reports", reports.clone());

        let destination = object("s3://reports/report/out.txt");
        storage
            .put(&destination, Bytes::from_static(b"r"))
            .await
            .unwrap();
        storage
            .put(&object("s3://datalake/42-a.json"), Bytes::from_static(b"d"))
            .await
            .unwrap();

        assert!(
            reports
                .head(&ObjectPath::from("report/out.txt"))
                .await
                .is_ok()
        );
        assert!(
            default
                .head(&ObjectPath::from("datalake/42-a.json"))
                .await
                .is_ok()
        );
        assert!(
            default
                .head(&ObjectPath::from("reports/report/out.txt"))
                .await
                .is_err()
        );
    }

    #[test]
    fn test_router_from_config() {
        let mut config = StorageConfig {
            default: "memory://".to_string(),
            ..Default::default()
        };
        config.buckets.insert(
            "reports".to_string(),
            BucketConfig {
                dsn: "memory://".to_string(),
            },
        );
        let router = ObjectStoreRouter::from_config(&config).unwrap();
        assert!(router.buckets.contains_key("reports"));
    }

    #[test]
    fn test_invalid_dsn() {
        let result = create_object_store_from_dsn("not-a-url");
        assert!(matches!(result, Err(ConnectionError::StorageDsn { .. })));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = create_object_store_from_dsn("gcs://bucket/prefix").unwrap_err();
        assert!(err.to_string().contains("Unsupported storage scheme"));
    }

    #[test]
    fn test_file_dsn_without_path() {
        let err = create_object_store_from_dsn("file://").unwrap_err();
        assert!(err.to_string().contains("File DSN must specify a path"));
    }

    #[test]
    fn test_s3_dsn_parsing() {
        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://mybucket.s3.amazonaws.com/prefix").unwrap(),
        );
        assert!(result.is_ok());

        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://access:secret@localhost:9000/bucket").unwrap(),
        );
        assert!(result.is_ok());

        let result = create_s3_builder_from_dsn(&Url::parse("s3://localhost:9000/").unwrap());
        assert!(result.unwrap_err().contains("must specify a bucket"));
    }
}
