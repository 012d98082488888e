use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    capabilities::PersistenceStore,
    events::{EnrichedEvent, EventBus, expect},
    queues::QueueKind,
    workers::{InputSpec, SlidesChanged, SubscriptionSpec, Worker},
};

/// Saves the newest slide list of a project whenever the deck changes.
///
/// Rapid edits collapse into one save because the input keeps only the latest
/// snapshot. A failed save is logged and the next change tries again.
pub struct SlidePersistWorker {
    store: Arc<dyn PersistenceStore>,
}

impl SlidePersistWorker {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Worker for SlidePersistWorker {
    const SUBSCRIBER_ID: &'static str = "slides.persist";

    fn subscription() -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![InputSpec {
                event_type: SlidesChanged::EVENT_TYPE,
                queue_kind: QueueKind::Latest1,
            }],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, _bus: &EventBus) -> Result<()> {
        let changed = expect::<SlidesChanged>(&event.event, SlidesChanged::EVENT_TYPE)?;

        match self
            .store
            .save_slides(&changed.project_id, &changed.slides)
            .await
        {
            Ok(()) => debug!(
                project = %changed.project_id,
                slides = changed.slides.len(),
                "slides saved"
            ),
            Err(e) => warn!(project = %changed.project_id, error = %e, "saving slides failed"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::broadcast;

    use super::*;
    use crate::{
        error::PersistenceError,
        events::{BusConfig, EventBusBuilder},
        types::Slide,
    };

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<(String, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl PersistenceStore for RecordingStore {
        async fn save_slides(
            &self,
            project_id: &str,
            slides: &[Slide],
        ) -> Result<(), PersistenceError> {
            if self.fail {
                return Err(PersistenceError::Rejected {
                    project_id: project_id.to_string(),
                    reason: "offline".into(),
                });
            }
            self.saved
                .lock()
                .unwrap()
                .push((project_id.to_string(), slides.len()));
            Ok(())
        }
    }

    async fn run_with(store: Arc<RecordingStore>, publish: usize) {
        let (bus, mut wiring, tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(SlidePersistWorker::subscription())
            .build()
            .unwrap();
        tasks.spawn_all();
        let bus = Arc::new(bus);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        for n in 1..=publish {
            let slides = (0..n).map(|i| Slide::new(format!("s{i}"), "")).collect();
            bus.publish(Arc::new(SlidesChanged::new("deck".into(), slides)));
        }

        let handle = wiring
            .spawn(SlidePersistWorker::new(store), &bus, &shutdown_rx)
            .unwrap();
        tokio::task::yield_now().await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn saves_only_the_latest_snapshot() {
        let store = Arc::new(RecordingStore::default());
        run_with(Arc::clone(&store), 3).await;

        assert_eq!(*store.saved.lock().unwrap(), vec![("deck".to_string(), 3)]);
    }

    #[tokio::test]
    async fn failed_save_does_not_stop_the_worker() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        run_with(Arc::clone(&store), 1).await;

        assert!(store.saved.lock().unwrap().is_empty());
    }
}
