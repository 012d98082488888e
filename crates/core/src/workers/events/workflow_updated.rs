use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    events::{Event, EventHeader},
    workflow::Workflow,
};

/// Full workflow snapshot, published after every tracker mutation.
#[derive(Clone, Debug, Serialize)]
pub struct WorkflowUpdated {
    pub header: EventHeader,
    pub workflow: Workflow,
}

impl WorkflowUpdated {
    pub const EVENT_TYPE: &'static str = "workflow.updated";

    pub fn new(workflow: Workflow) -> Self {
        Self {
            header: EventHeader::new(),
            workflow,
        }
    }
}

impl Event for WorkflowUpdated {
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
