use std::{any::Any, sync::Arc, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Event, EventHeader};

/// A worker's handler returned an error for `parents[0]`.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerFailed {
    pub header: EventHeader,
    pub stage: &'static str,
    pub message: String,
}

impl WorkerFailed {
    pub const EVENT_TYPE: &'static str = "worker.failed";

    pub fn new(cause: &Arc<dyn Event>, subscriber_id: &'static str, message: String) -> Self {
        Self {
            header: EventHeader::caused_by(cause.event_id()),
            stage: subscriber_id,
            message,
        }
    }
}

impl Event for WorkerFailed {
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
