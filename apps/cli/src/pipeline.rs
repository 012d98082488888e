use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use slidecast_core::{
    events::{BusConfig, EventBus, EventBusBuilder},
    storage::FsPersistenceStore,
    workers::{SlidePersistWorker, Worker},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, warn};

use crate::workers::{event_log::EventLogWorker, progress_renderer::ProgressRendererWorker};

pub struct ObserverOptions {
    /// Where `slides.json` files are kept, one directory per project.
    pub slides_root: PathBuf,
    /// Mirror every event into this JSON-lines file.
    pub event_log: Option<PathBuf>,
}

/// Workers that watch the pipeline through the bus: the progress bar, slide
/// persistence and the optional event log.
pub struct ObserverHandle {
    pub bus: Arc<EventBus>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl ObserverHandle {
    /// Signals every worker and waits for them to drain their inboxes.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for (id, handle) in self.handles {
            let dropped = self.bus.drops_for(id);
            if dropped > 0 {
                debug!(worker = id, dropped, "worker inbox dropped events");
            }
            match handle.await {
                Ok(Ok(())) => debug!(worker = id, "worker stopped"),
                Ok(Err(e)) => warn!(worker = id, error = %format!("{e:#}"), "worker exited with error"),
                Err(e) => warn!(worker = id, error = %e, "worker panicked"),
            }
        }
    }
}

pub fn start_observers(options: ObserverOptions) -> Result<ObserverHandle> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let mut builder = EventBusBuilder::new(BusConfig::default())
        .subscribe(ProgressRendererWorker::subscription())
        .subscribe(SlidePersistWorker::subscription());
    if options.event_log.is_some() {
        builder = builder.subscribe(EventLogWorker::subscription());
    }

    let (bus, mut wiring, tasks) = builder.build()?;
    let bus = Arc::new(bus);

    // isolated forwarders must run before anything publishes
    tasks.spawn_all();

    let mut handles = vec![
        (
            ProgressRendererWorker::SUBSCRIBER_ID,
            wiring.spawn(ProgressRendererWorker::new(), &bus, &shutdown_rx)?,
        ),
        (
            SlidePersistWorker::SUBSCRIBER_ID,
            wiring.spawn(
                SlidePersistWorker::new(Arc::new(FsPersistenceStore::new(options.slides_root))),
                &bus,
                &shutdown_rx,
            )?,
        ),
    ];

    if let Some(path) = options.event_log {
        handles.push((
            EventLogWorker::SUBSCRIBER_ID,
            wiring.spawn(EventLogWorker::new(path), &bus, &shutdown_rx)?,
        ));
    }

    Ok(ObserverHandle {
        bus,
        shutdown_tx,
        handles,
    })
}
