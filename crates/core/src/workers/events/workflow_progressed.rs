use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::events::{Event, EventHeader};

/// One operation's progress changed.
#[derive(Clone, Debug, Serialize)]
pub struct ProgressEvent {
    pub header: EventHeader,
    pub workflow_id: Uuid,
    pub operation_id: Uuid,
    pub step: usize,
    pub progress: f64,
    pub message: String,
}

impl ProgressEvent {
    pub const EVENT_TYPE: &'static str = "workflow.progress";

    pub fn new(
        workflow_id: Uuid,
        operation_id: Uuid,
        step: usize,
        progress: f64,
        message: String,
    ) -> Self {
        Self {
            header: EventHeader::new(),
            workflow_id,
            operation_id,
            step,
            progress,
            message,
        }
    }
}

impl Event for ProgressEvent {
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
