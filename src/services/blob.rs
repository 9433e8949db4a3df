//! Blob storage for raw uploaded track files.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("IO error in blob store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid blob key '{0}'")]
    InvalidKey(String),
}

/// Key/value text storage that hands back a retrievable URL.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `text` under `key`, returning a URL for it.
    async fn put_text(&self, key: &str, text: &str) -> Result<String, BlobError>;

    /// Fetch the text under `key`, `None` if nothing is stored there.
    async fn get_text(&self, key: &str) -> Result<Option<String>, BlobError>;
}

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key below the root, refusing anything that could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_text(&self, key: &str, text: &str) -> Result<String, BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, text).await?;
        tracing::debug!("Stored blob {} ({} bytes)", key, text.len());
        Ok(format!("file://{}", path.display()))
    }

    async fn get_text(&self, key: &str) -> Result<Option<String>, BlobError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> (LocalBlobStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("blobs-{}", uuid::Uuid::new_v4()));
        (LocalBlobStore::new(&root), root)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (store, root) = scratch_store();
        let url = store
            .put_text("routes/abc/original.gpx", "<gpx/>")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("routes/abc/original.gpx"));
        assert_eq!(
            store.get_text("routes/abc/original.gpx").await.unwrap(),
            Some("<gpx/>".to_string())
        );
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (store, _) = scratch_store();
        assert_eq!(store.get_text("routes/nope.gpx").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (store, _) = scratch_store();
        assert!(matches!(
            store.put_text("../outside.gpx", "x").await,
            Err(BlobError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get_text("/etc/passwd").await,
            Err(BlobError::InvalidKey(_))
        ));
        assert!(store.get_text("").await.is_err());
    }
}
