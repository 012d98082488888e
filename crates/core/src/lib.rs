pub mod cache;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod frames;
pub mod pipeline;
pub mod planner;
pub mod provider;
pub mod queues;
pub mod retry;
pub mod routes;
pub mod slides;
pub mod storage;
pub mod transcription;
pub mod types;
pub mod uploader;
pub mod workers;
pub mod workflow;

pub use cache::{CheckpointStore, JobCheckpoint, asset_id, get_asset_dir, get_root_cache_dir};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use format::{format_duration, format_timestamp, format_transcript_with_timestamps};
pub use frames::{FrameBatch, FrameExtractor, FrameLibrary};
pub use pipeline::{MediaPipeline, PipelineReport, PipelineRequest, PipelineServices};
pub use planner::{ChunkLimits, needs_chunking, plan_chunks, plan_for_asset};
pub use provider::{HttpTranscriptionService, TranscriptionProvider};
pub use slides::SlideDeck;
pub use transcription::{MergedTranscript, TranscriptEntry, merge_segments};
pub use types::{
    Chunk, ChunkPlan, ChunkStatus, ChunkWindow, ExtractedFrame, ProbeInfo, Slide, SourceAsset,
    StorageRef, TranscriptSegment,
};
pub use workflow::{JobOutcome, Workflow, WorkflowTracker};
