//! Still frames rendered at requested timestamps, deduplicated across a
//! project through a shared [`FrameLibrary`].

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    capabilities::{BlobStore, FrameRenderer},
    error::{RenderError, SlideError},
    retry::{RetryPolicy, with_retry},
    slides::SlideDeck,
    types::{ExtractedFrame, SourceAsset, StorageRef},
    uploader::TransferProgress,
    workflow::StepReporter,
};

/// Library key of a timestamp: whole milliseconds. Negative and non-finite
/// timestamps have no key.
pub fn normalize_timestamp(timestamp: f64) -> Option<i64> {
    if !timestamp.is_finite() || timestamp < 0.0 {
        return None;
    }
    Some((timestamp * 1000.0).round() as i64)
}

pub fn frame_path(asset_id: &str, key: i64) -> String {
    format!("{asset_id}/frames/{key}.jpg")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryMerge {
    pub inserted: usize,
    /// Incoming frames dropped because the library already had that timestamp.
    pub kept_existing: usize,
}

/// At most one frame per normalized timestamp, shared by every slide of a
/// project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameLibrary {
    frames: HashMap<i64, ExtractedFrame>,
}

impl FrameLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, timestamp: f64) -> Option<&ExtractedFrame> {
        normalize_timestamp(timestamp).and_then(|key| self.frames.get(&key))
    }

    pub fn contains(&self, timestamp: f64) -> bool {
        self.get(timestamp).is_some()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// All frames ordered by timestamp.
    pub fn frames(&self) -> Vec<&ExtractedFrame> {
        let mut frames: Vec<&ExtractedFrame> = self.frames.values().collect();
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        frames
    }

    /// Inserts frames whose timestamp is not yet present. On a collision the
    /// frame already in the library is kept and the incoming one dropped.
    pub fn merge_into_library(
        &mut self,
        new_frames: impl IntoIterator<Item = ExtractedFrame>,
    ) -> LibraryMerge {
        let mut summary = LibraryMerge::default();

        for frame in new_frames {
            let Some(key) = normalize_timestamp(frame.timestamp) else {
                warn!(timestamp = frame.timestamp, "frame with invalid timestamp dropped");
                continue;
            };

            match self.frames.entry(key) {
                std::collections::hash_map::Entry::Occupied(_) => summary.kept_existing += 1,
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(frame);
                    summary.inserted += 1;
                }
            }
        }

        summary
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedFrame {
    pub timestamp: f64,
    pub error: String,
}

/// Result of one [`FrameExtractor::request_frames`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBatch {
    /// One frame per distinct requested timestamp that resolved, in request
    /// order.
    pub frames: Vec<ExtractedFrame>,
    pub failed: Vec<FailedFrame>,
    pub rendered: usize,
    pub reused: usize,
    /// Cancellation stopped the batch before every timestamp was handled.
    pub cancelled: bool,
}

pub struct FrameExtractor {
    renderer: Arc<dyn FrameRenderer>,
    store: Arc<dyn BlobStore>,
    retry: RetryPolicy,
}

impl FrameExtractor {
    pub fn new(
        renderer: Arc<dyn FrameRenderer>,
        store: Arc<dyn BlobStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            renderer,
            store,
            retry,
        }
    }

    /// Resolves `timestamps` to frames, rendering only those the library does
    /// not already hold.
    ///
    /// Repeating a request is free and returns the same frames. A frame that
    /// still fails after retry is listed in [`FrameBatch::failed`] and the
    /// rest of the batch continues. Cancellation is checked between frames.
    pub async fn request_frames(
        &self,
        asset: &SourceAsset,
        library: &mut FrameLibrary,
        timestamps: &[f64],
        reporter: &StepReporter,
        cancel: &CancellationToken,
    ) -> FrameBatch {
        let mut batch = FrameBatch::default();
        let mut keys: Vec<i64> = Vec::with_capacity(timestamps.len());
        let mut seen: HashSet<i64> = HashSet::with_capacity(timestamps.len());

        for &timestamp in timestamps {
            match normalize_timestamp(timestamp) {
                Some(key) if seen.insert(key) => keys.push(key),
                Some(_) => {}
                None => batch.failed.push(FailedFrame {
                    timestamp,
                    error: RenderError::InvalidTimestamp(timestamp).to_string(),
                }),
            }
        }

        let total = keys.len();
        for (i, &key) in keys.iter().enumerate() {
            let timestamp = key as f64 / 1000.0;

            if let Some(existing) = library.frames.get(&key) {
                batch.frames.push(existing.clone());
                batch.reused += 1;
            } else {
                if cancel.is_cancelled() {
                    batch.cancelled = true;
                    break;
                }

                match self.render_one(asset, timestamp, key).await {
                    Ok(frame) => {
                        library.merge_into_library([frame]);
                        if let Some(stored) = library.frames.get(&key) {
                            batch.frames.push(stored.clone());
                        }
                        batch.rendered += 1;
                    }
                    Err(e) => {
                        warn!(timestamp, error = %e, "frame failed");
                        batch.failed.push(FailedFrame {
                            timestamp,
                            error: e.to_string(),
                        });
                    }
                }
            }

            reporter.update(
                (i + 1) as f64 / total as f64 * 100.0,
                format!("frame {}/{}", i + 1, total),
            );
        }

        info!(
            rendered = batch.rendered,
            reused = batch.reused,
            failed = batch.failed.len(),
            "frames resolved"
        );
        batch
    }

    async fn render_one(
        &self,
        asset: &SourceAsset,
        timestamp: f64,
        key: i64,
    ) -> Result<ExtractedFrame, RenderError> {
        let renderer = &*self.renderer;
        let image = with_retry(&self.retry, "render_frame", move || {
            renderer.render_frame_at(asset, timestamp)
        })
        .await?;

        let path = frame_path(&asset.id, key);
        let progress = TransferProgress::detached();
        let (store, path, image, progress) = (&*self.store, path.as_str(), image.as_slice(), &progress);
        let image_ref = with_retry(&self.retry, "store_frame", move || {
            store.put(path, image, progress)
        })
        .await?;

        debug!(timestamp, image_ref = %image_ref, "frame rendered");
        Ok(ExtractedFrame {
            id: Uuid::new_v4(),
            timestamp,
            image_ref,
        })
    }
}

/// Replaces a slide's images with `frames`, in the given order.
///
/// Persistence is scheduled through the deck's change event and never awaited
/// here.
pub fn assign_frames_to_slide(
    deck: &mut SlideDeck,
    slide_id: Uuid,
    frames: &[ExtractedFrame],
) -> Result<(), SlideError> {
    let refs: Vec<StorageRef> = frames.iter().map(|f| f.image_ref.clone()).collect();
    deck.replace_images(slide_id, refs)
}

/// Gives every slide with a timestamp the library frame taken at that moment.
/// Returns how many slides were updated.
pub fn map_frames_to_slides(deck: &mut SlideDeck, library: &FrameLibrary) -> usize {
    let matches: Vec<(Uuid, ExtractedFrame)> = deck
        .slides()
        .iter()
        .filter_map(|slide| {
            let frame = library.get(slide.timestamp?)?;
            let already = slide.image_refs.len() == 1 && slide.image_refs[0] == frame.image_ref;
            (!already).then(|| (slide.id, frame.clone()))
        })
        .collect();

    let mut assigned = 0;
    for (slide_id, frame) in matches {
        match assign_frames_to_slide(deck, slide_id, std::slice::from_ref(&frame)) {
            Ok(()) => assigned += 1,
            Err(e) => warn!(slide = %slide_id, error = %e, "frame assignment failed"),
        }
    }
    assigned
}
