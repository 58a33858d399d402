//! Publishing: upload the compressed artifact to blob storage.
//!
//! [`BlobStore`] is the seam between the pipeline and the remote store.
//! The shipped implementation, [`ObjectStoreBlobStore`], wraps an
//! [`object_store::ObjectStore`] bound to one bucket: Amazon S3 in
//! production, a local directory during development, memory in tests.
//!
//! The handle is constructed once by whoever owns the pipeline and shared
//! as `Arc<dyn BlobStore>`; there is no global client. [`publish`] moves
//! each upload onto its own tokio task so a slow transfer never stalls the
//! caller's task, and reports every failure as a value.

use crate::error::{ImagePipelineError, UploadFailure};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Confirmation of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadReceipt {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub e_tag: Option<String>,
}

/// Remote object storage addressed by bucket and key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `local_path` to `bucket/key`, replacing any
    /// existing object.
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<UploadReceipt, UploadFailure>;
}

/// [`BlobStore`] backed by the `object_store` crate.
#[derive(Debug, Clone)]
pub struct ObjectStoreBlobStore {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBlobStore {
    /// Wrap an already configured store serving `bucket`.
    pub fn new(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }

    /// Amazon S3, with credentials and region from the standard `AWS_*`
    /// environment variables.
    pub fn s3_from_env(bucket: &str) -> Result<Self, ImagePipelineError> {
        let s3 = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| {
                ImagePipelineError::InvalidConfig(format!("S3 client for '{bucket}': {e}"))
            })?;
        Ok(Self::new(bucket, Arc::new(s3)))
    }

    /// Objects stored as files under `<root>/<bucket>/`. Development only.
    pub fn local(bucket: &str, root: &Path) -> Result<Self, ImagePipelineError> {
        let dir = root.join(bucket);
        std::fs::create_dir_all(&dir).map_err(|e| ImagePipelineError::LocalWrite {
            path: dir.clone(),
            source: e,
        })?;
        let fs = LocalFileSystem::new_with_prefix(&dir).map_err(|e| {
            ImagePipelineError::InvalidConfig(format!("local store at '{}': {e}", dir.display()))
        })?;
        Ok(Self::new(bucket, Arc::new(fs)))
    }

    /// Volatile in-process store.
    pub fn in_memory(bucket: &str) -> Self {
        Self::new(bucket, Arc::new(InMemory::new()))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Read back an object's bytes.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, UploadFailure> {
        let location = object_path(key)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| UploadFailure::Transport(e.to_string()))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| UploadFailure::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn upload(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> Result<UploadReceipt, UploadFailure> {
        if bucket != self.bucket {
            return Err(UploadFailure::BucketMismatch {
                bound: self.bucket.clone(),
                requested: bucket.to_string(),
            });
        }
        let location = object_path(key)?;

        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| UploadFailure::ReadLocal {
                path: local_path.to_path_buf(),
                source: e,
            })?;
        let size = bytes.len() as u64;

        let result = self
            .store
            .put(&location, PutPayload::from(bytes))
            .await
            .map_err(|e| UploadFailure::Transport(e.to_string()))?;

        Ok(UploadReceipt {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            e_tag: result.e_tag,
        })
    }
}

fn object_path(key: &str) -> Result<ObjectPath, UploadFailure> {
    ObjectPath::parse(key).map_err(|e| UploadFailure::InvalidKey(format!("'{key}': {e}")))
}

/// Upload `local_path` to `bucket/key` on a separate task.
///
/// Never panics: transport errors, unreadable files and a panicking upload
/// task all come back as [`ImagePipelineError::Upload`].
pub async fn publish(
    store: Arc<dyn BlobStore>,
    local_path: PathBuf,
    bucket: String,
    key: String,
) -> Result<UploadReceipt, ImagePipelineError> {
    let start = Instant::now();
    debug!("Uploading {} → {}/{}", local_path.display(), bucket, key);

    let task = {
        let (bucket, key) = (bucket.clone(), key.clone());
        tokio::spawn(async move { store.upload(&local_path, &bucket, &key).await })
    };

    let outcome = match task.await {
        Ok(result) => result,
        Err(join_err) => Err(UploadFailure::Task(join_err.to_string())),
    };

    match outcome {
        Ok(receipt) => {
            info!(
                "Uploaded {} bytes to {}/{} in {}ms",
                receipt.size,
                bucket,
                key,
                start.elapsed().as_millis()
            );
            Ok(receipt)
        }
        Err(source) => {
            warn!("Upload to {}/{} failed: {}", bucket, key, source);
            Err(ImagePipelineError::Upload {
                bucket,
                key,
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingStore;

    #[async_trait]
    impl BlobStore for PanickingStore {
        async fn upload(
            &self,
            _local_path: &Path,
            _bucket: &str,
            _key: &str,
        ) -> Result<UploadReceipt, UploadFailure> {
            panic!("store exploded");
        }
    }

    fn local_file(dir: &Path, bytes: &[u8]) -> PathBuf {
        let p = dir.join("artifact.png");
        std::fs::write(&p, bytes).unwrap();
        p
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = local_file(tmp.path(), b"png-bytes");
        let store = Arc::new(ObjectStoreBlobStore::in_memory("shsat"));

        let receipt = publish(
            store.clone(),
            file,
            "shsat".into(),
            "test-images/2022/A/question/55.png".into(),
        )
        .await
        .unwrap();
        assert_eq!(receipt.size, 9);
        assert_eq!(receipt.key, "test-images/2022/A/question/55.png");

        let stored = store
            .fetch("test-images/2022/A/question/55.png")
            .await
            .unwrap();
        assert_eq!(stored, b"png-bytes");
    }

    #[tokio::test]
    async fn wrong_bucket_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = local_file(tmp.path(), b"x");
        let store = Arc::new(ObjectStoreBlobStore::in_memory("shsat"));

        let err = publish(store, file, "other".into(), "k.png".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImagePipelineError::Upload {
                source: UploadFailure::BucketMismatch { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_local_file_is_upload_error() {
        let store = Arc::new(ObjectStoreBlobStore::in_memory("shsat"));
        let err = publish(
            store.clone(),
            PathBuf::from("/definitely/not/here.png"),
            "shsat".into(),
            "k.png".into(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ImagePipelineError::Upload {
                source: UploadFailure::ReadLocal { .. },
                ..
            }
        ));
        assert!(store.fetch("k.png").await.is_err());
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = local_file(tmp.path(), b"x");
        let store = Arc::new(ObjectStoreBlobStore::in_memory("shsat"));
        let err = publish(store, file, "shsat".into(), "a//b.png".into())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn panicking_store_becomes_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = local_file(tmp.path(), b"x");
        let err = publish(Arc::new(PanickingStore), file, "b".into(), "k".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImagePipelineError::Upload {
                source: UploadFailure::Task(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn local_backend_writes_under_bucket_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = local_file(tmp.path(), b"abc");
        let root = tmp.path().join("store");
        let store = Arc::new(ObjectStoreBlobStore::local("shsat", &root).unwrap());

        publish(store, file, "shsat".into(), "test-images/x/1.png".into())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(root.join("shsat/test-images/x/1.png")).unwrap(),
            b"abc"
        );
    }
}
