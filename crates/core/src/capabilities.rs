//! Collaborators the pipeline calls but does not implement.
//!
//! The CLI provides ffmpeg/ffprobe backed media capabilities, [`crate::storage`]
//! provides filesystem stores and [`crate::provider`] an HTTP transcription
//! client. Tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::{
    error::{
        MaterializeError, PersistenceError, ProbeError, RenderError, TranscriptionError,
        UploadError,
    },
    types::{ChunkWindow, ProbeInfo, Slide, SourceAsset, StorageRef},
    uploader::TransferProgress,
};

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, asset: &SourceAsset) -> Result<ProbeInfo, ProbeError>;
}

#[async_trait]
pub trait MediaMaterializer: Send + Sync {
    /// Renders the time range of `window` into a standalone file's bytes.
    async fn materialize(
        &self,
        asset: &SourceAsset,
        window: &ChunkWindow,
    ) -> Result<Vec<u8>, MaterializeError>;

    /// File extension of the materialized bytes, without the dot.
    fn output_extension(&self) -> &str;
}

#[async_trait]
pub trait FrameRenderer: Send + Sync {
    /// Encoded still image (JPEG) of the frame at `timestamp` seconds.
    async fn render_frame_at(
        &self,
        asset: &SourceAsset,
        timestamp: f64,
    ) -> Result<Vec<u8>, RenderError>;
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `bytes` under `path`, reporting transferred byte counts through
    /// `progress` as it goes.
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        progress: &TransferProgress,
    ) -> Result<StorageRef, UploadError>;

    async fn get(&self, storage_ref: &StorageRef) -> Result<Vec<u8>, UploadError>;
}

#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, storage_ref: &StorageRef) -> Result<String, TranscriptionError>;
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_slides(&self, project_id: &str, slides: &[Slide])
    -> Result<(), PersistenceError>;
}
