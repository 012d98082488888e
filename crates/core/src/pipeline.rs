//! The single control flow driving one asset from probe to merged transcript.
//!
//! Chunks are processed strictly one after another: upload, transcribe,
//! checkpoint, next. Cancellation is observed at chunk boundaries and between
//! frames; a call already in flight always completes.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cache::{CheckpointStore, JobCheckpoint},
    capabilities::{BlobStore, FrameRenderer, MediaMaterializer, MediaProbe, TranscriptionService},
    config::PipelineConfig,
    error::Result,
    frames::{FrameBatch, FrameExtractor, FrameLibrary},
    planner::plan_for_asset,
    retry::{RetryPolicy, with_retry},
    transcription::{MergedTranscript, TranscriptionSubmitter, merge_segments},
    types::{Chunk, ChunkPlan, ChunkStatus, ProbeInfo, SourceAsset, TranscriptSegment},
    uploader::{ChunkUploader, TransferProgress},
    workflow::{JobOutcome, StepReporter, StepSpec, Workflow, WorkflowTracker},
};

pub const STEP_PROBE: usize = 0;
pub const STEP_PLAN: usize = 1;
pub const STEP_UPLOAD: usize = 2;
pub const STEP_TRANSCRIBE: usize = 3;
pub const STEP_MERGE: usize = 4;
pub const STEP_FRAMES: usize = 5;

fn workflow_steps(with_frames: bool) -> Vec<StepSpec> {
    let mut steps = vec![
        StepSpec::new("probe", 5.0).continue_on_failure(),
        StepSpec::new("plan", 5.0),
        StepSpec::new("upload", 35.0).continue_on_failure(),
        StepSpec::new("transcribe", 35.0).continue_on_failure(),
        StepSpec::new("merge", 10.0),
    ];
    if with_frames {
        steps.push(StepSpec::new("frames", 10.0).continue_on_failure());
    }
    steps
}

/// External capabilities the pipeline drives.
#[derive(Clone)]
pub struct PipelineServices {
    pub probe: Arc<dyn MediaProbe>,
    pub materializer: Arc<dyn MediaMaterializer>,
    pub renderer: Arc<dyn FrameRenderer>,
    pub store: Arc<dyn BlobStore>,
    pub transcriber: Arc<dyn TranscriptionService>,
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub asset: SourceAsset,
    /// Seconds into the asset. Empty means no frame step.
    pub frame_timestamps: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// The asset as probed.
    pub asset: SourceAsset,
    pub plan: ChunkPlan,
    pub chunks: Vec<Chunk>,
    /// `None` only when the run was cancelled before any chunk transcribed.
    pub transcript: Option<MergedTranscript>,
    pub frames: Option<FrameBatch>,
    /// Chunks taken over as complete from a checkpoint.
    pub resumed: usize,
    pub outcome: JobOutcome,
    pub workflow: Workflow,
}

pub struct MediaPipeline {
    config: PipelineConfig,
    retry: RetryPolicy,
    probe: Arc<dyn MediaProbe>,
    uploader: ChunkUploader,
    submitter: TranscriptionSubmitter,
    extractor: FrameExtractor,
    tracker: WorkflowTracker,
    checkpoints: Option<CheckpointStore>,
}

impl MediaPipeline {
    pub fn new(
        config: PipelineConfig,
        services: PipelineServices,
        tracker: WorkflowTracker,
    ) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_policy();

        Ok(Self {
            uploader: ChunkUploader::new(
                services.materializer,
                Arc::clone(&services.store),
                retry,
            ),
            submitter: TranscriptionSubmitter::new(services.transcriber, retry),
            extractor: FrameExtractor::new(services.renderer, services.store, retry),
            probe: services.probe,
            tracker,
            checkpoints: None,
            retry,
            config,
        })
    }

    /// Persist progress after every chunk and resume from it on the next run
    /// of the same asset.
    pub fn with_checkpoints(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn tracker(&self) -> &WorkflowTracker {
        &self.tracker
    }

    pub async fn run(
        &self,
        request: PipelineRequest,
        library: &mut FrameLibrary,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport> {
        let PipelineRequest {
            asset,
            frame_timestamps,
        } = request;
        let with_frames = !frame_timestamps.is_empty();

        let workflow = self
            .tracker
            .start_workflow(format!("process {}", asset.id), &workflow_steps(with_frames))?;
        let workflow_id = workflow.id;
        let step = |index| self.tracker.reporter(workflow_id, index);

        // Probe
        let probing = step(STEP_PROBE);
        probing.update(0.0, "probing media");
        let probed = {
            let (probe, asset) = (&*self.probe, &asset);
            with_retry(&self.retry, "probe", move || probe.probe(asset)).await
        };
        let info = match probed {
            Ok(info) => {
                probing.succeed(match info.duration_secs {
                    Some(d) => format!("{d:.1}s"),
                    None => "duration unknown".to_string(),
                });
                info
            }
            Err(e) => {
                warn!(asset = %asset.id, error = %e, "probe failed, falling back to size heuristic");
                probing.fail(e.to_string());
                ProbeInfo::default()
            }
        };
        let asset = asset.probed(&info);

        // Plan
        let mut config = self.config.clone();
        if let Some(bps) = info.estimated_bitrate_bps.filter(|bps| *bps > 0) {
            config.assumed_bitrate_bps = bps;
        }
        let plan = plan_for_asset(&asset, &config);
        step(STEP_PLAN).succeed(format!(
            "{} chunk(s){}",
            plan.len(),
            if plan.estimated { ", estimated" } else { "" }
        ));
        info!(asset = %asset.id, chunks = plan.len(), duration = plan.total_duration, "plan ready");

        let (mut chunks, mut segments) = self.resume(&asset.id, &plan).await;
        let resumed = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Complete)
            .count();

        // Upload and transcribe, one chunk at a time
        let uploading = step(STEP_UPLOAD);
        let transcribing = step(STEP_TRANSCRIBE);
        let total = chunks.len();
        let mut cancelled = false;

        for i in 0..total {
            if chunks[i].status == ChunkStatus::Complete {
                continue;
            }
            if cancel.is_cancelled() {
                info!(chunk = i, "cancelled before chunk");
                cancelled = true;
                break;
            }

            let progress = TransferProgress::new(uploading.clone(), i, i, total);
            if self
                .uploader
                .upload_chunk(&asset, &mut chunks[i], &progress)
                .await
                .is_ok()
                && let Ok(segment) = self.submitter.submit_chunk(&mut chunks[i]).await
            {
                segments.push(segment);
            }

            let complete = chunks
                .iter()
                .filter(|c| c.status == ChunkStatus::Complete)
                .count();
            uploading.update(
                progress.stage_progress(100.0),
                format!("{} of {total} chunks processed", i + 1),
            );
            transcribing.update(
                (i + 1) as f64 / total as f64 * 100.0,
                format!("{complete} of {total} chunks transcribed"),
            );

            self.checkpoint(&asset.id, &plan, &chunks, &segments, None)
                .await;
        }

        if !cancelled {
            let uploaded = chunks.iter().filter(|c| c.storage_ref.is_some()).count();
            let complete = chunks
                .iter()
                .filter(|c| c.status == ChunkStatus::Complete)
                .count();
            finish_step(&uploading, uploaded > 0, format!("{uploaded} of {total} uploaded"));
            finish_step(
                &transcribing,
                complete > 0,
                format!("{complete} of {total} transcribed"),
            );
        }

        // Merge
        let merging = step(STEP_MERGE);
        let transcript = match merge_segments(&plan, segments.iter().cloned()) {
            Ok(transcript) => {
                if !cancelled {
                    merging.succeed(transcript.outcome().to_string());
                }
                Some(transcript)
            }
            Err(_) if cancelled => None,
            Err(e) => {
                merging.fail(e.to_string());
                let snapshot = self.tracker.finish(
                    workflow_id,
                    JobOutcome::Failed {
                        reason: e.to_string(),
                    },
                )?;
                self.checkpoint(&asset.id, &plan, &chunks, &segments, Some(snapshot))
                    .await;
                self.tracker.discard(workflow_id);
                return Err(e.into());
            }
        };

        // Frames
        let frames = if with_frames && !cancelled {
            let framing = step(STEP_FRAMES);
            let batch = self
                .extractor
                .request_frames(&asset, library, &frame_timestamps, &framing, cancel)
                .await;
            cancelled = batch.cancelled;
            if !cancelled {
                finish_step(
                    &framing,
                    batch.failed.is_empty() || !batch.frames.is_empty(),
                    format!("{} frame(s), {} failed", batch.frames.len(), batch.failed.len()),
                );
            }
            Some(batch)
        } else {
            None
        };

        let outcome = match &transcript {
            _ if cancelled => JobOutcome::Cancelled {
                completed: chunks
                    .iter()
                    .filter(|c| c.status == ChunkStatus::Complete)
                    .count(),
                total,
            },
            Some(transcript) => transcript.outcome(),
            None => JobOutcome::Failed {
                reason: "no transcript".to_string(),
            },
        };
        info!(asset = %asset.id, outcome = %outcome, "job finished");

        let workflow = self.tracker.finish(workflow_id, outcome.clone())?;
        self.checkpoint(&asset.id, &plan, &chunks, &segments, Some(workflow.clone()))
            .await;
        self.tracker.discard(workflow_id);

        Ok(PipelineReport {
            asset,
            plan,
            chunks,
            transcript,
            frames,
            resumed,
            outcome,
            workflow,
        })
    }

    /// Chunks and segments to start from. Only a checkpoint made for the same
    /// plan is used; its unfinished chunks start over as pending.
    async fn resume(&self, asset_id: &str, plan: &ChunkPlan) -> (Vec<Chunk>, Vec<TranscriptSegment>) {
        let fresh = || {
            (
                plan.windows.iter().copied().map(Chunk::pending).collect(),
                Vec::new(),
            )
        };

        let Some(store) = &self.checkpoints else {
            return fresh();
        };

        match store.load(asset_id).await {
            Ok(Some(checkpoint)) if checkpoint.plan.matches(plan) => {
                let chunks: Vec<Chunk> = checkpoint
                    .chunks
                    .into_iter()
                    .map(|chunk| match chunk.status {
                        ChunkStatus::Complete => chunk,
                        _ => Chunk {
                            attempts: chunk.attempts,
                            ..Chunk::pending(chunk.window)
                        },
                    })
                    .collect();
                let segments = checkpoint
                    .segments
                    .into_iter()
                    .filter(|seg| {
                        chunks
                            .get(seg.chunk_index)
                            .is_some_and(|c| c.status == ChunkStatus::Complete)
                    })
                    .collect();
                info!(asset = asset_id, "resuming from checkpoint");
                (chunks, segments)
            }
            Ok(Some(_)) => {
                info!(asset = asset_id, "checkpoint was made for a different plan, starting fresh");
                fresh()
            }
            Ok(None) => fresh(),
            Err(e) => {
                warn!(asset = asset_id, error = %e, "unreadable checkpoint, starting fresh");
                fresh()
            }
        }
    }

    async fn checkpoint(
        &self,
        asset_id: &str,
        plan: &ChunkPlan,
        chunks: &[Chunk],
        segments: &[TranscriptSegment],
        workflow: Option<Workflow>,
    ) {
        let Some(store) = &self.checkpoints else {
            return;
        };

        let checkpoint = JobCheckpoint {
            asset_id: asset_id.to_string(),
            plan: plan.clone(),
            chunks: chunks.to_vec(),
            segments: segments.to_vec(),
            workflow,
        };
        if let Err(e) = store.save(&checkpoint).await {
            warn!(asset = asset_id, error = %e, "saving checkpoint failed");
        }
    }
}

fn finish_step(reporter: &StepReporter, success: bool, message: String) {
    if success {
        reporter.succeed(message);
    } else {
        reporter.fail(message);
    }
}
