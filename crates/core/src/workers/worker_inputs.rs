use std::sync::Arc;

use tokio::sync::{Notify, mpsc};

use crate::{
    events::EnrichedEvent,
    queues::{FifoDropOldestReceiver, Latest1Queue},
};

pub struct Latest1Input {
    pub event_type: &'static str,
    pub queue: Arc<Latest1Queue<Arc<EnrichedEvent>>>,
}

pub enum FifoReceiver {
    FifoDropOldest(FifoDropOldestReceiver<Arc<EnrichedEvent>>),
    Isolated(mpsc::Receiver<Arc<EnrichedEvent>>),
}

impl FifoReceiver {
    fn try_recv(&mut self) -> Option<Arc<EnrichedEvent>> {
        match self {
            FifoReceiver::FifoDropOldest(r) => r.try_recv(),
            FifoReceiver::Isolated(r) => r.try_recv().ok(),
        }
    }
}

pub struct FifoInput {
    pub event_type: &'static str,
    pub receiver: FifoReceiver,
}

/// All inboxes of one subscriber, sharing a single wakeup.
pub struct WorkerInputs {
    pub latest: Vec<Latest1Input>,
    pub fifos: Vec<FifoInput>,
    pub notify_any: Arc<Notify>,
    pub fifo_index: usize,
}

pub enum WorkerBatch {
    Snapshots(Vec<SnapshotUpdate>),
    FifoItem {
        event_type: &'static str,
        event: Arc<EnrichedEvent>,
    },
}

pub struct SnapshotUpdate {
    pub event_type: &'static str,
    pub event: Arc<EnrichedEvent>,
}

impl WorkerInputs {
    /// Waits for the next batch. Pending snapshots win over FIFO items and
    /// FIFO inputs are polled round robin.
    pub async fn next(&mut self) -> WorkerBatch {
        loop {
            if let Some(batch) = self.try_next() {
                return batch;
            }
            self.notify_any.notified().await;
        }
    }

    pub fn try_next(&mut self) -> Option<WorkerBatch> {
        let snaps: Vec<SnapshotUpdate> = self
            .latest
            .iter()
            .filter_map(|l| {
                l.queue.try_recv().map(|event| SnapshotUpdate {
                    event_type: l.event_type,
                    event,
                })
            })
            .collect();

        if !snaps.is_empty() {
            return Some(WorkerBatch::Snapshots(snaps));
        }

        for _ in 0..self.fifos.len() {
            let i = self.fifo_index;
            self.fifo_index = (self.fifo_index + 1) % self.fifos.len();
            let fifo = &mut self.fifos[i];

            if let Some(event) = fifo.receiver.try_recv() {
                return Some(WorkerBatch::FifoItem {
                    event_type: fifo.event_type,
                    event,
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::{BusConfig, EventBusBuilder},
        queues::QueueKind,
        workers::{InputSpec, SlidesChanged, SubscriptionSpec, WorkflowUpdated},
        workflow::{StepSpec, Workflow},
    };

    #[tokio::test]
    async fn snapshots_are_drained_before_fifo_items() {
        let (bus, mut wiring, tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(SubscriptionSpec {
                subscriber_id: "observer",
                inputs: vec![
                    InputSpec {
                        event_type: SlidesChanged::EVENT_TYPE,
                        queue_kind: QueueKind::FifoDropOldest { capacity: 4 },
                    },
                    InputSpec {
                        event_type: WorkflowUpdated::EVENT_TYPE,
                        queue_kind: QueueKind::Latest1,
                    },
                ],
            })
            .build()
            .unwrap();
        tasks.spawn_all();

        let mut inputs = wiring.take("observer").unwrap();
        let workflow = Workflow::new("job", &[StepSpec::new("probe", 1.0)]).unwrap();

        bus.publish(Arc::new(SlidesChanged::new("p".into(), Vec::new())));
        bus.publish(Arc::new(WorkflowUpdated::new(workflow.clone())));
        bus.publish(Arc::new(WorkflowUpdated::new(workflow)));

        match inputs.next().await {
            WorkerBatch::Snapshots(updates) => {
                assert_eq!(updates.len(), 1);
                assert_eq!(updates[0].event_type, WorkflowUpdated::EVENT_TYPE);
            }
            WorkerBatch::FifoItem { .. } => panic!("expected snapshot batch first"),
        }

        match inputs.next().await {
            WorkerBatch::FifoItem { event_type, .. } => {
                assert_eq!(event_type, SlidesChanged::EVENT_TYPE)
            }
            WorkerBatch::Snapshots(_) => panic!("snapshot was already taken"),
        }

        assert!(inputs.try_next().is_none());
    }
}
