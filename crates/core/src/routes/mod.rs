use std::{
    collections::HashMap,
    sync::{Arc, atomic::AtomicU64},
};

use crate::{
    events::EnrichedEvent,
    queues::{FifoDropOldestQueue, IsolatedForwarder, Latest1Queue},
};

/// Routing table built once by the bus builder; read-only afterwards.
#[derive(Default)]
pub struct Routes {
    table: HashMap<&'static str, Vec<Route>>,
}

impl Routes {
    pub fn new(table: HashMap<&'static str, Vec<Route>>) -> Self {
        Self { table }
    }

    /// Inputs subscribed to `event_type`, or `None` when nobody listens.
    pub fn for_event(&self, event_type: &str) -> Option<&[Route]> {
        self.table
            .get(event_type)
            .map(Vec::as_slice)
            .filter(|routes| !routes.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.table.values().flatten()
    }
}

pub struct Route {
    pub subscriber_id: &'static str,
    pub inbox: RouteInbox,
    pub drops_total: Arc<AtomicU64>,
}

pub enum RouteInbox {
    Latest1(Arc<Latest1Queue<Arc<EnrichedEvent>>>),
    FifoDropOldest(Arc<FifoDropOldestQueue<Arc<EnrichedEvent>>>),
    Isolated(IsolatedForwarder<Arc<EnrichedEvent>>),
}

impl RouteInbox {
    /// Returns false when delivering cost an event: either the new one was
    /// refused or an older queued one was evicted.
    pub fn try_deliver(&self, event: Arc<EnrichedEvent>) -> bool {
        match self {
            RouteInbox::Latest1(q) => {
                q.set(event);
                true
            }
            RouteInbox::FifoDropOldest(q) => !q.push_overwrite(event),
            RouteInbox::Isolated(fwd) => fwd.try_send(event).is_ok(),
        }
    }
}
