use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::CheckpointError,
    types::{Chunk, ChunkPlan, ChunkStatus, TranscriptSegment},
    workflow::Workflow,
};

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("slidecast")
}

/// Stable id for an asset: a name-based (v5) UUID over its canonical path
/// and size, rendered as 32 hex digits.
pub fn asset_id(location: &Path, byte_size: u64) -> String {
    let canonical = std::fs::canonicalize(location).unwrap_or_else(|_| location.to_path_buf());
    let name = format!("{}:{}", canonical.display(), byte_size);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
        .simple()
        .to_string()
}

/// Get the cache directory for a given asset
pub fn get_asset_dir(root: &Path, asset_id: &str) -> PathBuf {
    root.join(asset_id)
}

/// Get the path for the rendered transcript of an asset
pub fn get_transcript_path(asset_dir: &Path) -> PathBuf {
    asset_dir.join("transcript.txt")
}

pub fn get_checkpoint_path(asset_dir: &Path) -> PathBuf {
    asset_dir.join("checkpoint.json")
}

/// Everything needed to resume a job for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    pub asset_id: String,
    pub plan: ChunkPlan,
    pub chunks: Vec<Chunk>,
    pub segments: Vec<TranscriptSegment>,
    pub workflow: Option<Workflow>,
}

impl JobCheckpoint {
    pub fn completed_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Complete)
            .count()
    }
}

/// Checkpoints as `<root>/<asset id>/checkpoint.json`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, asset_id: &str) -> PathBuf {
        get_checkpoint_path(&get_asset_dir(&self.root, asset_id))
    }

    pub async fn load(&self, asset_id: &str) -> Result<Option<JobCheckpoint>, CheckpointError> {
        let path = self.path_for(asset_id);
        let json_content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: JobCheckpoint = serde_json::from_str(&json_content)?;
        info!(
            asset = asset_id,
            completed = checkpoint.completed_chunks(),
            total = checkpoint.chunks.len(),
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    pub async fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.asset_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let pretty_json = serde_json::to_string_pretty(checkpoint)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &pretty_json).await?;
        fs::rename(&tmp, &path).await?;

        debug!(asset = %checkpoint.asset_id, "checkpoint saved");
        Ok(())
    }

    pub async fn clear(&self, asset_id: &str) -> Result<(), CheckpointError> {
        match fs::remove_file(self.path_for(asset_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
