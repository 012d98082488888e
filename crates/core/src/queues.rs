//! Subscriber inbox implementations.
//!
//! Each subscriber input picks one of these when it is wired:
//! - [`Latest1Queue`] keeps only the newest value (workflow snapshots, slide
//!   saves). Overwriting an unread value is not a loss.
//! - [`FifoDropOldestQueue`] keeps up to `capacity` values in order and evicts
//!   the oldest when full.
//! - [`IsolatedForwarder`] decouples the publisher from a slow consumer through
//!   a drain task and a bounded channel.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Mutex},
};

use tokio::sync::{Notify, mpsc};

pub enum QueueKind {
    Latest1,
    FifoDropOldest { capacity: usize },
    Isolated { output_buffer: usize },
}

/// Forwarder drain tasks that must be spawned before anything publishes.
pub struct StartupTasks {
    pub tokio: Vec<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl StartupTasks {
    pub fn spawn_all(self) {
        for task in self.tokio {
            tokio::spawn(task);
        }
    }
}

pub struct Latest1Queue<T> {
    slot: Mutex<Option<T>>,
    notify_any: Arc<Notify>,
}

impl<T> Latest1Queue<T> {
    pub fn new(notify_any: Arc<Notify>) -> Self {
        Self {
            slot: Mutex::new(None),
            notify_any,
        }
    }

    /// Stores `value`, returning true if it replaced an unread one.
    pub fn set(&self, value: T) -> bool {
        let replaced = self
            .slot
            .lock()
            .expect("Latest1Queue poisoned")
            .replace(value)
            .is_some();
        self.notify_any.notify_one();
        replaced
    }

    pub fn try_recv(&self) -> Option<T> {
        self.slot.lock().expect("Latest1Queue poisoned").take()
    }
}

pub struct FifoDropOldestQueue<T> {
    inner: Arc<FifoDropOldestInner<T>>,
}

struct FifoDropOldestInner<T> {
    buf: Mutex<VecDeque<T>>,
    capacity: usize,
    notify_any: Arc<Notify>,
}

pub struct FifoDropOldestReceiver<T> {
    inner: Arc<FifoDropOldestInner<T>>,
}

impl<T> FifoDropOldestQueue<T> {
    pub fn new(capacity: usize, notify_any: Arc<Notify>) -> Self {
        assert!(capacity > 0);

        Self {
            inner: Arc::new(FifoDropOldestInner {
                buf: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify_any,
            }),
        }
    }

    /// Appends `value`, returning true if the oldest value was evicted to
    /// make room.
    pub fn push_overwrite(&self, value: T) -> bool {
        let mut buf = self.inner.buf.lock().expect("FifoDropOldestQueue poisoned");
        let evicted = if buf.len() >= self.inner.capacity {
            buf.pop_front().is_some()
        } else {
            false
        };
        buf.push_back(value);
        drop(buf);
        self.inner.notify_any.notify_one();
        evicted
    }

    pub fn receiver(&self) -> FifoDropOldestReceiver<T> {
        FifoDropOldestReceiver {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FifoDropOldestReceiver<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.inner
            .buf
            .lock()
            .expect("FifoDropOldestQueue poisoned")
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.buf.lock().expect("FifoDropOldestQueue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct IsolatedForwarder<T> {
    inbox_tx: mpsc::Sender<T>,
}

const ISOLATED_INBOX_CAPACITY: usize = 16;

impl<T: Send + 'static> IsolatedForwarder<T> {
    pub fn new(
        output_buffer: usize,
        notify_any: Arc<Notify>,
    ) -> (
        IsolatedForwarder<T>,
        mpsc::Receiver<T>,
        Pin<Box<dyn Future<Output = ()> + Send>>,
    ) {
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<T>(ISOLATED_INBOX_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<T>(output_buffer);

        let drain_task = Box::pin(async move {
            while let Some(value) = inbox_rx.recv().await {
                if out_tx.send(value).await.is_err() {
                    break;
                }
                notify_any.notify_one();
            }
        });

        (IsolatedForwarder { inbox_tx }, out_rx, drain_task)
    }

    /// Hands `value` to the drain task; fails when its inbox is full or the
    /// consumer is gone.
    pub fn try_send(&self, value: T) -> Result<(), T> {
        self.inbox_tx.try_send(value).map_err(|e| e.into_inner())
    }
}
