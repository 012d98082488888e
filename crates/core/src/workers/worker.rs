use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::{
    events::{EnrichedEvent, EventBus},
    workers::{SubscriptionSpec, WorkerBatch, WorkerFailed, WorkerInputs},
};

/// A bus subscriber with its own task and inboxes.
///
/// `run` drains snapshot inputs before FIFO inputs and hands every event to
/// `handle`. Handler errors never stop the loop; they are logged and
/// republished as [`WorkerFailed`].
#[async_trait]
pub trait Worker: Send + Sized + 'static {
    const SUBSCRIBER_ID: &'static str;

    fn subscription() -> SubscriptionSpec;

    async fn handle(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) -> Result<()>;

    /// Called once after shutdown is signalled, before `run` returns.
    async fn finish(&mut self, _bus: &EventBus) -> Result<()> {
        Ok(())
    }

    async fn run(
        mut self,
        mut inputs: WorkerInputs,
        bus: Arc<EventBus>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                batch = inputs.next() => match batch {
                    WorkerBatch::Snapshots(updates) => {
                        for update in updates {
                            self.dispatch(update.event, &bus).await;
                        }
                    }
                    WorkerBatch::FifoItem { event, .. } => self.dispatch(event, &bus).await,
                }
            }
        }

        // Whatever is still queued at shutdown gets handled before finish.
        while let Some(batch) = inputs.try_next() {
            match batch {
                WorkerBatch::Snapshots(updates) => {
                    for update in updates {
                        self.dispatch(update.event, &bus).await;
                    }
                }
                WorkerBatch::FifoItem { event, .. } => self.dispatch(event, &bus).await,
            }
        }

        debug!(subscriber = Self::SUBSCRIBER_ID, "worker stopping");
        self.finish(&bus).await
    }

    async fn dispatch(&mut self, event: Arc<EnrichedEvent>, bus: &EventBus) {
        let cause = Arc::clone(&event.event);
        if let Err(e) = self.handle(event, bus).await {
            error!(subscriber = Self::SUBSCRIBER_ID, error = %e, "worker handler failed");
            bus.publish(Arc::new(WorkerFailed::new(
                &cause,
                Self::SUBSCRIBER_ID,
                format!("{e:#}"),
            )));
        }
    }
}
