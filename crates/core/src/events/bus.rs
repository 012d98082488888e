use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

use crate::{
    events::{BusConfig, BusMetrics, EnrichedEvent, Event},
    routes::Routes,
};

/// Publish side of the bus. Cheap to clone; every clone routes into the same
/// subscriber inboxes.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    session_id: Uuid,
    next_ingest_seq: AtomicU64,
    routes: Routes,
    metrics: Arc<BusMetrics>,
    strict_routing: bool,
}

impl EventBus {
    pub fn new(cfg: BusConfig, routes: Routes, metrics: Arc<BusMetrics>) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                session_id: cfg.session_id,
                next_ingest_seq: AtomicU64::new(0),
                routes,
                metrics,
                strict_routing: cfg.strict_routing,
            }),
        }
    }

    /// Delivers `event` to every inbox subscribed to its type without
    /// waiting on any subscriber.
    pub fn publish(&self, event: Arc<dyn Event>) {
        let ingest_seq = self.inner.next_ingest_seq.fetch_add(1, Ordering::Relaxed);
        let event_type = event.event_type();

        let Some(routes) = self.inner.routes.for_event(event_type) else {
            self.inner.metrics.record_unrouted(event_type);

            if self.inner.strict_routing {
                panic!("Unrouted event type: {}", event_type);
            }

            return;
        };

        let enriched_event = Arc::new(EnrichedEvent {
            event,
            session_id: self.inner.session_id,
            ingest_seq,
            ingested_at: Instant::now(),
        });

        for route in routes {
            let delivered = route.inbox.try_deliver(Arc::clone(&enriched_event));

            if !delivered {
                route.drops_total.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.record_drop(route.subscriber_id, event_type);
            }
            trace!(event_type, subscriber = route.subscriber_id, ingest_seq, delivered, "routed");
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    /// Events dropped so far for one subscriber, across all its inputs.
    pub fn drops_for(&self, subscriber_id: &str) -> u64 {
        self.inner
            .routes
            .iter()
            .filter(|route| route.subscriber_id == subscriber_id)
            .map(|route| route.drops_total.load(Ordering::Relaxed))
            .sum()
    }
}
