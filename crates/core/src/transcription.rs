use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    capabilities::TranscriptionService,
    error::{ChunkError, MergeError, TranscriptionError},
    format::format_transcript_with_timestamps,
    retry::{RetryPolicy, with_retry},
    types::{Chunk, ChunkPlan, ChunkStatus, TranscriptSegment},
    workflow::JobOutcome,
};

/// Sends uploaded chunks to the transcription service.
pub struct TranscriptionSubmitter {
    service: Arc<dyn TranscriptionService>,
    retry: RetryPolicy,
}

impl TranscriptionSubmitter {
    pub fn new(service: Arc<dyn TranscriptionService>, retry: RetryPolicy) -> Self {
        Self { service, retry }
    }

    /// Transcribes an `uploaded` chunk. The segment inherits the chunk's window
    /// bounds as its time offsets.
    pub async fn submit_chunk(&self, chunk: &mut Chunk) -> Result<TranscriptSegment, ChunkError> {
        let Some(storage_ref) = chunk.storage_ref.clone() else {
            let e = TranscriptionError::NotUploaded(chunk.index());
            chunk.fail(&e);
            return Err(e.into());
        };

        chunk.set_status(ChunkStatus::Transcribing);
        let calls = AtomicU32::new(0);
        let result = {
            let (service, storage_ref, calls) = (&*self.service, &storage_ref, &calls);
            with_retry(&self.retry, "transcribe", move || {
                calls.fetch_add(1, Ordering::Relaxed);
                service.transcribe(storage_ref)
            })
            .await
        };
        chunk.attempts += calls.load(Ordering::Relaxed);

        match result {
            Ok(text) => {
                chunk.error = None;
                chunk.set_status(ChunkStatus::Complete);
                debug!(chunk = chunk.index(), chars = text.len(), "chunk transcribed");
                Ok(TranscriptSegment {
                    chunk_index: chunk.index(),
                    text: text.trim().to_string(),
                    start: chunk.window.start,
                    end: chunk.window.end,
                })
            }
            Err(e) => {
                warn!(chunk = chunk.index(), error = %e, "transcribing chunk failed");
                chunk.fail(&e);
                Err(e.into())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Segment(TranscriptSegment),
    /// A chunk that produced no transcript.
    Gap {
        chunk_index: usize,
        start: f64,
        end: f64,
    },
}

impl TranscriptEntry {
    pub fn chunk_index(&self) -> usize {
        match self {
            TranscriptEntry::Segment(seg) => seg.chunk_index,
            TranscriptEntry::Gap { chunk_index, .. } => *chunk_index,
        }
    }
}

/// One entry per planned chunk, in chunk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedTranscript {
    pub entries: Vec<TranscriptEntry>,
    pub succeeded: usize,
    pub total: usize,
}

impl MergedTranscript {
    /// Plain text of all segments, gaps omitted.
    pub fn text(&self) -> String {
        self.segments()
            .map(|seg| seg.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text with `[MM:SS]` offsets and `[gap MM:SS-MM:SS]` markers.
    pub fn render(&self) -> String {
        format_transcript_with_timestamps(self)
    }

    pub fn segments(&self) -> impl Iterator<Item = &TranscriptSegment> {
        self.entries.iter().filter_map(|entry| match entry {
            TranscriptEntry::Segment(seg) => Some(seg),
            TranscriptEntry::Gap { .. } => None,
        })
    }

    pub fn gaps(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, TranscriptEntry::Gap { .. }))
            .map(TranscriptEntry::chunk_index)
            .collect()
    }

    pub fn outcome(&self) -> JobOutcome {
        JobOutcome::from_counts(self.succeeded, self.total)
    }
}

/// Merges per-chunk segments into plan order.
///
/// Completion order is irrelevant. For a chunk reported twice the first
/// segment wins. Chunks with no segment become gap entries at their position.
/// Fails only when no chunk produced a segment.
pub fn merge_segments(
    plan: &ChunkPlan,
    segments: impl IntoIterator<Item = TranscriptSegment>,
) -> Result<MergedTranscript, MergeError> {
    let mut by_chunk: BTreeMap<usize, TranscriptSegment> = BTreeMap::new();

    for seg in segments {
        if seg.chunk_index >= plan.len() {
            warn!(chunk = seg.chunk_index, planned = plan.len(), "segment outside the plan dropped");
            continue;
        }
        by_chunk.entry(seg.chunk_index).or_insert(seg);
    }

    let total = plan.len();
    let succeeded = by_chunk.len();
    if succeeded == 0 {
        return Err(MergeError::NoSegments { total });
    }

    let entries = plan
        .windows
        .iter()
        .map(|window| match by_chunk.remove(&window.index) {
            Some(seg) => TranscriptEntry::Segment(seg),
            None => TranscriptEntry::Gap {
                chunk_index: window.index,
                start: window.start,
                end: window.end,
            },
        })
        .collect();

    Ok(MergedTranscript {
        entries,
        succeeded,
        total,
    })
}
