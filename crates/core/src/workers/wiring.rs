use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    events::EventBus,
    queues::QueueKind,
    workers::{Worker, WorkerInputs},
};

/// Everything one subscriber listens to.
pub struct SubscriptionSpec {
    pub subscriber_id: &'static str,
    pub inputs: Vec<InputSpec>,
}

pub struct InputSpec {
    pub event_type: &'static str,
    pub queue_kind: QueueKind,
}

/// Inboxes built by [`crate::events::EventBusBuilder`], waiting to be claimed
/// by their workers.
pub struct WorkerWiring {
    inputs: HashMap<&'static str, WorkerInputs>,
}

impl WorkerWiring {
    pub fn new(inputs: HashMap<&'static str, WorkerInputs>) -> Self {
        Self { inputs }
    }

    pub fn take(&mut self, subscriber_id: &'static str) -> Option<WorkerInputs> {
        self.inputs.remove(subscriber_id)
    }

    /// Claims the inboxes of `W` and starts its run loop on the runtime.
    pub fn spawn<W: Worker>(
        &mut self,
        worker: W,
        bus: &Arc<EventBus>,
        shutdown: &broadcast::Receiver<()>,
    ) -> Result<JoinHandle<Result<()>>> {
        let inputs = self
            .take(W::SUBSCRIBER_ID)
            .with_context(|| format!("subscriber {} was not wired", W::SUBSCRIBER_ID))?;

        Ok(tokio::spawn(worker.run(
            inputs,
            Arc::clone(bus),
            shutdown.resubscribe(),
        )))
    }
}
