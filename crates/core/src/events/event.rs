use std::{any::Any, sync::Arc, time::SystemTime};

use erased_serde::Serialize as ErasedSerialize;
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

pub trait Event: Send + Sync + ErasedSerialize + 'static {
    fn event_id(&self) -> Uuid;
    fn parent_ids(&self) -> &[Uuid];
    fn event_type(&self) -> &'static str;
    fn timestamp(&self) -> SystemTime;

    fn schema_version(&self) -> u32 {
        1
    }

    fn as_any(&self) -> &dyn Any;
}

/// Common identity fields carried by every concrete event.
#[derive(Clone, Debug, Serialize)]
pub struct EventHeader {
    pub event_id: Uuid,
    pub parent_ids: Vec<Uuid>,
    pub timestamp: SystemTime,
}

impl EventHeader {
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            parent_ids: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn caused_by(parent: Uuid) -> Self {
        Self {
            parent_ids: vec![parent],
            ..Self::new()
        }
    }
}

impl Default for EventHeader {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EnrichedEvent {
    pub event: Arc<dyn Event>,
    pub ingest_seq: u64,
    pub session_id: Uuid,
    pub ingested_at: Instant,
}

pub fn downcast_ref<T: 'static>(e: &Arc<dyn Event>) -> Option<&T> {
    e.as_any().downcast_ref::<T>()
}

pub fn expect<'a, T: 'static>(
    e: &'a Arc<dyn Event>,
    expected_event_type: &'static str,
) -> anyhow::Result<&'a T> {
    downcast_ref::<T>(e).ok_or_else(|| {
        anyhow::anyhow!(
            "expected event_type={}, got={}",
            expected_event_type,
            e.event_type()
        )
    })
}

/// Serializes any event as a single JSON object, tagged with its type.
pub fn to_json_line(e: &EnrichedEvent) -> serde_json::Result<String> {
    let mut payload = Vec::new();
    erased_serde::serialize(&*e.event, &mut serde_json::Serializer::new(&mut payload))?;

    serde_json::to_string(&serde_json::json!({
        "event_type": e.event.event_type(),
        "schema_version": e.event.schema_version(),
        "ingest_seq": e.ingest_seq,
        "session_id": e.session_id,
        "payload": serde_json::from_slice::<serde_json::Value>(&payload)?,
    }))
}
