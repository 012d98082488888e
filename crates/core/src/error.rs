use std::{path::PathBuf, time::Duration};

use thiserror::Error;
use uuid::Uuid;

use crate::retry::TimeoutError;

/// Duration or size of an asset could not be determined.
///
/// Never fatal: the planner falls back to a size-based estimate.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Probe failed for {location}: {reason}")]
    Failed { location: String, reason: String },

    #[error("Probe timed out after {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A chunk window could not be rendered to bytes.
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Materializing chunk {index} failed: {reason}")]
    Failed { index: usize, reason: String },

    #[error("Materializing timed out after {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blob storage failure, on either put or get.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Storage rejected {path}: {reason}")]
    Rejected { path: String, reason: String },

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Upload timed out after {0:?}")]
    TimedOut(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("Transcription service rejected the request ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Invalid transcription response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: {env_var} environment variable is not set")]
    MissingApiKey { env_var: String },

    #[error("Chunk {0} has not been uploaded")]
    NotUploaded(usize),

    #[error("Reading uploaded chunk failed: {0}")]
    Storage(#[from] UploadError),

    #[error("API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Transcription timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Rendering frame at {timestamp:.3}s failed: {reason}")]
    Failed { timestamp: f64, reason: String },

    #[error("Invalid frame timestamp {0}")]
    InvalidTimestamp(f64),

    #[error("Rendering timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Storing frame failed: {0}")]
    Storage(#[from] UploadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("No transcript was produced for any of the {total} chunks")]
    NoSegments { total: usize },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Persisting slides for project {project_id} failed: {reason}")]
    Rejected { project_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow {0} is not registered")]
    UnknownWorkflow(Uuid),

    #[error("A workflow needs at least one step")]
    NoSteps,

    #[error("Step {label:?} has invalid weight {weight}")]
    InvalidWeight { label: String, weight: f64 },

    #[error("Step {index} is out of range (workflow has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error("Step {index} already finished")]
    StepFinished { index: usize },
}

#[derive(Error, Debug, PartialEq)]
pub enum SlideError {
    #[error("A slide deck cannot be empty")]
    EmptyDeck,

    #[error("The last remaining slide cannot be deleted")]
    LastSlide,

    #[error("Slide {0} not found")]
    NotFound(Uuid),

    #[error("Nothing to undo")]
    NothingToUndo,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Reading config {path} failed: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single chunk at any stage. Local to that chunk.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
}

/// Errors escalated to the caller of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl TimeoutError for ProbeError {
    fn timed_out(after: Duration) -> Self {
        ProbeError::TimedOut(after)
    }
}

impl TimeoutError for MaterializeError {
    fn timed_out(after: Duration) -> Self {
        MaterializeError::TimedOut(after)
    }
}

impl TimeoutError for UploadError {
    fn timed_out(after: Duration) -> Self {
        UploadError::TimedOut(after)
    }
}

impl TimeoutError for TranscriptionError {
    fn timed_out(after: Duration) -> Self {
        TranscriptionError::TimedOut(after)
    }
}

impl TimeoutError for RenderError {
    fn timed_out(after: Duration) -> Self {
        RenderError::TimedOut(after)
    }
}
