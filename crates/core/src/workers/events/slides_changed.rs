use std::{any::Any, time::SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::{
    events::{Event, EventHeader},
    types::Slide,
};

/// The slide list of a project after an edit.
#[derive(Clone, Debug, Serialize)]
pub struct SlidesChanged {
    pub header: EventHeader,
    pub project_id: String,
    pub slides: Vec<Slide>,
}

impl SlidesChanged {
    pub const EVENT_TYPE: &'static str = "slides.changed";

    pub fn new(project_id: String, slides: Vec<Slide>) -> Self {
        Self {
            header: EventHeader::new(),
            project_id,
            slides,
        }
    }
}

impl Event for SlidesChanged {
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
