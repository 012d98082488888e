use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The audio/video file being processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    pub id: String,
    pub location: PathBuf,
    pub byte_size: u64,
    pub duration_secs: Option<f64>,
    pub content_type: String,
}

impl SourceAsset {
    pub fn new(
        id: impl Into<String>,
        location: impl Into<PathBuf>,
        byte_size: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            byte_size,
            duration_secs: None,
            content_type: content_type.into(),
        }
    }

    pub fn with_duration(mut self, duration_secs: Option<f64>) -> Self {
        self.duration_secs = duration_secs;
        self
    }

    /// Returns the asset as seen after probing. A probe that could not
    /// measure the duration keeps whatever was known before.
    pub fn probed(self, info: &ProbeInfo) -> Self {
        let duration_secs = info.duration_secs.or(self.duration_secs);
        self.with_duration(duration_secs)
    }

    /// Duration if it is known and usable for planning.
    pub fn known_duration(&self) -> Option<f64> {
        self.duration_secs.filter(|d| d.is_finite() && *d > 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub duration_secs: Option<f64>,
    pub estimated_bitrate_bps: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkWindow {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl ChunkWindow {
    pub fn new(index: usize, start: f64, end: f64) -> Self {
        Self {
            index,
            start,
            end,
            duration: end - start,
        }
    }
}

/// Ordered windows covering `[0, total_duration)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPlan {
    pub windows: Vec<ChunkWindow>,
    pub total_duration: f64,
    /// True when the duration was estimated from the byte size.
    pub estimated: bool,
}

impl ChunkPlan {
    pub fn single(total_duration: f64, estimated: bool) -> Self {
        Self {
            windows: vec![ChunkWindow::new(0, 0.0, total_duration)],
            total_duration,
            estimated,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Same windows at millisecond resolution. Used to decide whether a
    /// stored checkpoint still applies to a freshly computed plan.
    pub fn matches(&self, other: &ChunkPlan) -> bool {
        let ms = |secs: f64| (secs * 1000.0).round() as i64;

        self.estimated == other.estimated
            && ms(self.total_duration) == ms(other.total_duration)
            && self.windows.len() == other.windows.len()
            && self.windows.iter().zip(&other.windows).all(|(a, b)| {
                a.index == b.index && ms(a.start) == ms(b.start) && ms(a.end) == ms(b.end)
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Materializing,
    Uploading,
    Uploaded,
    Transcribing,
    Complete,
    Failed,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkStatus::Complete | ChunkStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub window: ChunkWindow,
    pub status: ChunkStatus,
    pub storage_ref: Option<StorageRef>,
    pub error: Option<String>,
    /// Calls made against external services for this chunk, retries included.
    #[serde(default)]
    pub attempts: u32,
}

impl Chunk {
    pub fn pending(window: ChunkWindow) -> Self {
        Self {
            window,
            status: ChunkStatus::Pending,
            storage_ref: None,
            error: None,
            attempts: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.window.index
    }

    pub fn set_status(&mut self, status: ChunkStatus) {
        tracing::debug!(chunk = self.window.index, from = ?self.status, to = ?status, "chunk status");
        self.status = status;
    }

    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
        self.set_status(ChunkStatus::Failed);
    }
}

/// Opaque reference to a blob written to a [`crate::capabilities::BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageRef(pub String);

impl StorageRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub chunk_index: usize,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFrame {
    pub id: Uuid,
    pub timestamp: f64,
    pub image_ref: StorageRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub timestamp: Option<f64>,
    pub image_refs: Vec<StorageRef>,
}

impl Slide {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            timestamp: None,
            image_refs: Vec::new(),
        }
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_match_despite_last_digit_drift() {
        let plan = ChunkPlan {
            windows: vec![
                ChunkWindow::new(0, 0.0, 419.46479329280004),
                ChunkWindow::new(1, 419.46479329280004, 600.5),
            ],
            total_duration: 600.5,
            estimated: false,
        };
        let mut reloaded = plan.clone();
        reloaded.windows[0].end = 419.4647932928;
        reloaded.windows[1].start = 419.4647932928;

        assert_ne!(plan, reloaded);
        assert!(plan.matches(&reloaded));

        let mut shifted = plan.clone();
        shifted.windows[1].end = 601.0;
        assert!(!plan.matches(&shifted));
        assert!(!plan.matches(&ChunkPlan::single(600.5, false)));
    }
}
