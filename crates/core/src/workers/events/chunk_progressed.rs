use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Event, EventHeader};

/// Per-chunk transfer progress in `[0, 100]`.
#[derive(Clone, Debug, Serialize)]
pub struct ChunkProgressed {
    pub header: EventHeader,
    pub workflow_id: Uuid,
    pub chunk_index: usize,
    pub progress: f64,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

impl ChunkProgressed {
    pub const EVENT_TYPE: &'static str = "chunk.progress";

    pub fn new(workflow_id: Uuid, chunk_index: usize, bytes_sent: u64, bytes_total: u64) -> Self {
        let progress = if bytes_total == 0 {
            100.0
        } else {
            (bytes_sent as f64 / bytes_total as f64 * 100.0).clamp(0.0, 100.0)
        };

        Self {
            header: EventHeader::new(),
            workflow_id,
            chunk_index,
            progress,
            bytes_sent,
            bytes_total,
        }
    }
}

impl Event for ChunkProgressed {
    fn event_id(&self) -> Uuid {
        self.header.event_id
    }

    fn parent_ids(&self) -> &[Uuid] {
        &self.header.parent_ids
    }

    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn timestamp(&self) -> SystemTime {
        self.header.timestamp
    }

    fn as_any(&self) -> &dyn Any {
        self as &dyn Any
    }
}
