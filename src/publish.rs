//! Latest-detections feed shared with consumers.
//!
//! `DetectionPublisher` is the single writer. `DetectionFeed` handles are cheap
//! clones handed to readers. Every publish swaps in a whole `Arc<DetectionSet>`,
//! so a reader holds either the old set or the new one, never a mix.
//!
//! Change notifications coalesce: a subscriber that falls behind sees one
//! pending signal and then reads the newest set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::detect::DetectionSet;

struct Shared {
    current: RwLock<Arc<DetectionSet>>,
    version: AtomicU64,
    subscribers: Mutex<Vec<Sender<()>>>,
}

impl Shared {
    fn current(&self) -> Arc<DetectionSet> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Single writer of the detection feed.
pub struct DetectionPublisher {
    shared: Arc<Shared>,
}

impl DetectionPublisher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                current: RwLock::new(Arc::new(DetectionSet::empty())),
                version: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Replace the current set and notify subscribers.
    ///
    /// Once this returns, every `current()` call observes `set` or a newer one.
    pub fn publish(&self, set: DetectionSet) {
        let set = Arc::new(set);
        {
            let mut current = self
                .shared
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *current = set;
            self.shared.version.fetch_add(1, Ordering::SeqCst);
        }

        let mut subscribers = self
            .shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        });
    }

    /// Publish the empty set.
    pub fn clear(&self) {
        self.publish(DetectionSet::empty());
    }

    pub fn current(&self) -> Arc<DetectionSet> {
        self.shared.current()
    }

    /// Number of completed publishes.
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::SeqCst)
    }

    /// Read-only handle for consumers.
    pub fn feed(&self) -> DetectionFeed {
        DetectionFeed {
            shared: self.shared.clone(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.feed().subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for DetectionPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DetectionPublisher {
    fn drop(&mut self) {
        // Dropping the senders wakes blocked subscribers with a disconnect.
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Read side of the feed.
#[derive(Clone)]
pub struct DetectionFeed {
    shared: Arc<Shared>,
}

impl DetectionFeed {
    pub fn current(&self) -> Arc<DetectionSet> {
        self.shared.current()
    }

    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = bounded(1);
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Subscription {
            rx,
            shared: self.shared.clone(),
        }
    }
}

/// "Changed" notifications for one consumer.
pub struct Subscription {
    rx: Receiver<()>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Block until the next change. `None` once the publisher is gone.
    pub fn recv(&self) -> Option<Arc<DetectionSet>> {
        self.rx.recv().ok().map(|()| self.shared.current())
    }

    /// Wait up to `timeout` for a change.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Arc<DetectionSet>> {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Some(self.shared.current()),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Pending change, if any.
    pub fn try_recv(&self) -> Option<Arc<DetectionSet>> {
        match self.rx.try_recv() {
            Ok(()) => Some(self.shared.current()),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
