//! Local-disk implementations of [`BlobStore`] and [`PersistenceStore`].

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use crate::{
    capabilities::{BlobStore, PersistenceStore},
    error::{PersistenceError, UploadError},
    types::{Slide, StorageRef},
    uploader::TransferProgress,
};

const WRITE_BLOCK: usize = 256 * 1024;

/// Blobs as files under a root directory. A [`StorageRef`] is the path
/// relative to that root.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a relative blob path. Paths escaping the root are
    /// rejected.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, UploadError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));

        if !safe {
            return Err(UploadError::Rejected {
                path: path.to_string(),
                reason: "blob paths must be relative and stay inside the store".into(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        progress: &TransferProgress,
    ) -> Result<StorageRef, UploadError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let total = bytes.len() as u64;
        let mut file = fs::File::create(&target).await?;
        let mut sent = 0u64;
        progress.report(0, total);

        for block in bytes.chunks(WRITE_BLOCK) {
            file.write_all(block).await?;
            sent += block.len() as u64;
            progress.report(sent, total);
        }
        file.flush().await?;

        debug!(path, bytes = total, "blob written");
        Ok(StorageRef(path.to_string()))
    }

    async fn get(&self, storage_ref: &StorageRef) -> Result<Vec<u8>, UploadError> {
        let target = self.resolve(storage_ref.as_str())?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(UploadError::NotFound(storage_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Slides as `<root>/<project>/slides.json`, replaced atomically.
pub struct FsPersistenceStore {
    root: PathBuf,
}

impl FsPersistenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn slides_path(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id).join("slides.json")
    }

    pub async fn load_slides(&self, project_id: &str) -> Result<Option<Vec<Slide>>, PersistenceError> {
        match fs::read_to_string(self.slides_path(project_id)).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PersistenceStore for FsPersistenceStore {
    async fn save_slides(&self, project_id: &str, slides: &[Slide]) -> Result<(), PersistenceError> {
        if project_id.is_empty() || project_id.contains(['/', '\\']) || project_id == ".." {
            return Err(PersistenceError::Rejected {
                project_id: project_id.to_string(),
                reason: "invalid project id".into(),
            });
        }

        let path = self.slides_path(project_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let pretty_json = serde_json::to_string_pretty(slides)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &pretty_json).await?;
        fs::rename(&tmp, &path).await?;

        debug!(project = project_id, slides = slides.len(), "slides persisted");
        Ok(())
    }
}
