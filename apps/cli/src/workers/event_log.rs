use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use slidecast_core::{
    events::{EnrichedEvent, EventBus, to_json_line},
    queues::QueueKind,
    workers::{
        ChunkProgressed, InputSpec, ProgressEvent, SlidesChanged, SubscriptionSpec, Worker,
        WorkerFailed, WorkflowUpdated,
    },
};
use tokio::{fs, io::AsyncWriteExt};

/// Appends every bus event to a JSON-lines file.
pub struct EventLogWorker {
    path: PathBuf,
    file: Option<fs::File>,
}

impl EventLogWorker {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }
}

fn logged(event_type: &'static str) -> InputSpec {
    InputSpec {
        event_type,
        queue_kind: QueueKind::Isolated { output_buffer: 256 },
    }
}

#[async_trait]
impl Worker for EventLogWorker {
    const SUBSCRIBER_ID: &'static str = "cli.event_log";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![
                logged(WorkflowUpdated::EVENT_TYPE),
                logged(ProgressEvent::EVENT_TYPE),
                logged(ChunkProgressed::EVENT_TYPE),
                logged(SlidesChanged::EVENT_TYPE),
                logged(WorkerFailed::EVENT_TYPE),
            ],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, _bus: &EventBus) -> Result<()> {
        if self.file.is_none() {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("opening event log {}", self.path.display()))?;
            self.file = Some(file);
        }

        let mut line = to_json_line(&event)?;
        line.push('\n');
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes()).await?;
        }
        Ok(())
    }

    async fn finish(&mut self, _bus: &EventBus) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}
