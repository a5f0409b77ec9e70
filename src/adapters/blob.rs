use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{Result, VerifyError};

/// Where an uploaded screenshot ended up
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub url: String,
    pub storage_id: String,
}

/// Object storage for screenshots
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: &[u8], content_type: &str) -> Result<StoredBlob>;

    async fn delete(&self, storage_id: &str) -> Result<()>;
}

/// Stores screenshots on local disk; the web server exposes the directory under `/uploads`
pub struct LocalBlobStore {
    root: PathBuf,
    public_base: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base: format!("{}/uploads", base_url.trim_end_matches('/')),
        }
    }

    fn path_for(&self, storage_id: &str) -> Result<PathBuf> {
        if storage_id.is_empty()
            || storage_id.contains(['/', '\\'])
            || storage_id.starts_with('.')
        {
            return Err(VerifyError::validation(format!(
                "Invalid storage id '{}'",
                storage_id
            )));
        }
        Ok(self.root.join(storage_id))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, bytes: &[u8], content_type: &str) -> Result<StoredBlob> {
        let storage_id = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(content_type));
        let path = self.path_for(&storage_id)?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| VerifyError::upstream("blob store", e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| VerifyError::upstream("blob store", e))?;

        debug!("Stored {} bytes at {}", bytes.len(), path.display());

        Ok(StoredBlob {
            url: format!("{}/{}", self.public_base, urlencoding::encode(&storage_id)),
            storage_id,
        })
    }

    async fn delete(&self, storage_id: &str) -> Result<()> {
        let path = self.path_for(storage_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VerifyError::upstream("blob store", e)),
        }
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_and_delete() {
        let root = std::env::temp_dir().join(format!("fest-verify-blobs-{}", uuid::Uuid::new_v4()));
        let store = LocalBlobStore::new(&root, "https://fest.example.org/");

        let blob = store.upload(b"\x89PNG....", "image/png").await.unwrap();
        assert!(blob.storage_id.ends_with(".png"));
        assert_eq!(
            blob.url,
            format!("https://fest.example.org/uploads/{}", blob.storage_id)
        );
        assert!(root.join(&blob.storage_id).exists());

        store.delete(&blob.storage_id).await.unwrap();
        assert!(!root.join(&blob.storage_id).exists());

        // Deleting twice is fine
        store.delete(&blob.storage_id).await.unwrap();

        tokio::fs::remove_dir_all(&root).await.ok();
    }

    #[tokio::test]
    async fn test_delete_rejects_traversal() {
        let store = LocalBlobStore::new("uploads", "http://localhost:3000");
        let err = store.delete("../state/verifications.json").await.unwrap_err();
        assert!(matches!(err, VerifyError::Validation { .. }));
    }
}
