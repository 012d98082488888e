use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::{
    events::{EnrichedEvent, EventBus},
    queues::{FifoDropOldestQueue, IsolatedForwarder, Latest1Queue, QueueKind, StartupTasks},
    routes::{Route, RouteInbox, Routes},
    workers::{
        FifoInput, FifoReceiver, Latest1Input, SubscriptionSpec, WorkerInputs, WorkerWiring,
    },
};

pub struct BusConfig {
    pub session_id: Uuid,
    /// Panic on events nobody subscribed to. Useful in tests that want to
    /// catch wiring mistakes.
    pub strict_routing: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            strict_routing: false,
        }
    }
}

#[derive(Default)]
pub struct BusMetrics {
    pub unrouted_publish_total: AtomicU64,
    pub dropped_total: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_unrouted(&self, event_type: &'static str) {
        self.unrouted_publish_total.fetch_add(1, Ordering::Relaxed);
        debug!(event_type, "no subscribers for event");
    }

    pub fn record_drop(&self, subscriber_id: &'static str, event_type: &'static str) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber_id, event_type, "subscriber inbox dropped an event");
    }
}

fn validate(subs: &[SubscriptionSpec]) -> Result<()> {
    use std::collections::HashSet;

    let mut seen_subscribers: HashSet<&'static str> = HashSet::new();
    for s in subs {
        if s.subscriber_id.trim().is_empty() {
            anyhow::bail!("empty subscriber_id");
        }
        if !seen_subscribers.insert(s.subscriber_id) {
            anyhow::bail!("duplicate subscriber_id={}", s.subscriber_id);
        }
        if s.inputs.is_empty() {
            anyhow::bail!("subscriber_id={} has no inputs", s.subscriber_id);
        }

        let mut seen_inputs: HashSet<&'static str> = HashSet::new();
        for i in &s.inputs {
            if i.event_type.trim().is_empty() {
                anyhow::bail!("subscriber_id={} has empty event_type", s.subscriber_id);
            }
            if !seen_inputs.insert(i.event_type) {
                anyhow::bail!(
                    "subscriber_id={} has duplicate input event_type={}",
                    s.subscriber_id,
                    i.event_type
                );
            }

            match i.queue_kind {
                QueueKind::Latest1 => {}
                QueueKind::FifoDropOldest { capacity } => {
                    anyhow::ensure!(capacity > 0, "capacity must be > 0")
                }
                QueueKind::Isolated { output_buffer } => {
                    anyhow::ensure!(output_buffer > 0, "output_buffer must be > 0")
                }
            }
        }
    }
    Ok(())
}

pub struct EventBusBuilder {
    cfg: BusConfig,
    subs: Vec<SubscriptionSpec>,
}

impl EventBusBuilder {
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            subs: Vec::new(),
        }
    }

    pub fn subscribe(mut self, s: SubscriptionSpec) -> Self {
        self.subs.push(s);
        self
    }

    pub fn build(self) -> Result<(EventBus, WorkerWiring, StartupTasks)> {
        validate(&self.subs)?;

        let mut routes: HashMap<&'static str, Vec<Route>> = HashMap::new();
        let mut wiring: HashMap<&'static str, WorkerInputs> = HashMap::new();
        let mut tasks = StartupTasks { tokio: Vec::new() };
        let metrics = Arc::new(BusMetrics::new());

        for spec in self.subs {
            let notify_any = Arc::new(Notify::new());
            let mut latest = Vec::new();
            let mut fifos = Vec::new();

            for input in spec.inputs {
                let drops_total = Arc::new(AtomicU64::new(0));

                let inbox = match input.queue_kind {
                    QueueKind::Latest1 => {
                        let q = Arc::new(Latest1Queue::new(Arc::clone(&notify_any)));
                        latest.push(Latest1Input {
                            event_type: input.event_type,
                            queue: Arc::clone(&q),
                        });
                        RouteInbox::Latest1(q)
                    }
                    QueueKind::FifoDropOldest { capacity } => {
                        let q =
                            Arc::new(FifoDropOldestQueue::new(capacity, Arc::clone(&notify_any)));
                        fifos.push(FifoInput {
                            event_type: input.event_type,
                            receiver: FifoReceiver::FifoDropOldest(q.receiver()),
                        });
                        RouteInbox::FifoDropOldest(q)
                    }
                    QueueKind::Isolated { output_buffer } => {
                        let (fwd, out_rx, drain_task) =
                            IsolatedForwarder::<Arc<EnrichedEvent>>::new(
                                output_buffer,
                                Arc::clone(&notify_any),
                            );
                        tasks.tokio.push(drain_task);
                        fifos.push(FifoInput {
                            event_type: input.event_type,
                            receiver: FifoReceiver::Isolated(out_rx),
                        });
                        RouteInbox::Isolated(fwd)
                    }
                };

                routes.entry(input.event_type).or_default().push(Route {
                    subscriber_id: spec.subscriber_id,
                    inbox,
                    drops_total,
                });
            }

            wiring.insert(
                spec.subscriber_id,
                WorkerInputs {
                    latest,
                    fifos,
                    notify_any,
                    fifo_index: 0,
                },
            );
        }

        let bus = EventBus::new(self.cfg, Routes::new(routes), metrics);
        Ok((bus, WorkerWiring::new(wiring), tasks))
    }
}

/// A bus with no subscribers. Publishing is a counted no-op.
pub fn detached_bus() -> EventBus {
    EventBus::new(
        BusConfig::default(),
        Routes::default(),
        Arc::new(BusMetrics::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::InputSpec;

    fn spec(id: &'static str, inputs: Vec<InputSpec>) -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: id,
            inputs,
        }
    }

    fn input(event_type: &'static str, queue_kind: QueueKind) -> InputSpec {
        InputSpec {
            event_type,
            queue_kind,
        }
    }

    #[test]
    fn rejects_duplicate_subscribers() {
        let result = EventBusBuilder::new(BusConfig::default())
            .subscribe(spec("a", vec![input("x", QueueKind::Latest1)]))
            .subscribe(spec("a", vec![input("y", QueueKind::Latest1)]))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rejects_zero_capacity() {
        let result = EventBusBuilder::new(BusConfig::default())
            .subscribe(spec(
                "a",
                vec![input("x", QueueKind::FifoDropOldest { capacity: 0 })],
            ))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn overflowing_fifo_counts_drops_per_subscriber() {
        use crate::workers::SlidesChanged;

        let fifo = QueueKind::FifoDropOldest { capacity: 1 };
        let (bus, _wiring, _tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(spec("slow", vec![input(SlidesChanged::EVENT_TYPE, fifo)]))
            .subscribe(spec("latest", vec![input(SlidesChanged::EVENT_TYPE, QueueKind::Latest1)]))
            .build()
            .unwrap();

        for _ in 0..3 {
            bus.publish(Arc::new(SlidesChanged::new("deck".into(), Vec::new())));
        }

        assert_eq!(bus.drops_for("slow"), 2);
        assert_eq!(bus.drops_for("latest"), 0);
        assert_eq!(bus.metrics().dropped_total.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn wiring_hands_out_inputs_once() {
        let (_bus, mut wiring, _tasks) = EventBusBuilder::new(BusConfig::default())
            .subscribe(spec("a", vec![input("x", QueueKind::Latest1)]))
            .build()
            .unwrap();

        assert!(wiring.take("a").is_some());
        assert!(wiring.take("a").is_none());
    }
}
