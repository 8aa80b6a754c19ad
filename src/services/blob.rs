use crate::error::{BlobError, BlobResult};
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

/// Blob key scheme for release artifacts.
pub struct BlobKey;

impl BlobKey {
    pub fn package(name: &str, version: &str) -> String {
        format!("packages/{name}-{version}.tar.gz")
    }

    pub fn docs(name: &str, version: &str) -> String {
        format!("docs/{name}-{version}.tar.gz")
    }
}

/// Storage for tarball and documentation bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: &[u8]) -> BlobResult<()>;

    async fn download(&self, key: &str) -> BlobResult<Vec<u8>>;

    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    async fn exists(&self, key: &str) -> bool;
}

/// Blobs as files under a root directory, one file per key.
#[derive(Debug)]
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> BlobResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        debug!("Blob store initialized at: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> BlobResult<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !well_formed {
            return Err(BlobError::InvalidKey(key.to_string()));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn upload(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers never see a half-written blob
        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!("Stored blob {key} ({} bytes)", bytes.len());
        Ok(())
    }

    async fn download(&self, key: &str) -> BlobResult<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => BlobError::NotFound(key.to_string()),
            _ => BlobError::Io(e),
        })
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted blob {key}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Blobs held in process memory, for ephemeral nodes and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

fn poisoned() -> BlobError {
    BlobError::Io(std::io::Error::other("memory blob store lock poisoned"))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn download(&self, key: &str) -> BlobResult<Vec<u8>> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.blobs
            .read()
            .map(|blobs| blobs.contains_key(key))
            .unwrap_or(false)
    }
}
