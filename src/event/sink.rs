use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;

pub type SinkId = u64;

/// A registered subscriber: its id (for `unsubscribe`) and the receiving
/// half of its channel.
#[derive(Debug)]
pub struct Subscription<T> {
    pub id: SinkId,
    pub receiver: mpsc::Receiver<T>,
}

#[derive(Debug)]
pub struct SinkRegistry<T> {
    capacity: usize,
    next_id: AtomicU64,
    senders: Mutex<Vec<(SinkId, mpsc::Sender<T>)>>,
}

impl<T: Clone + Send + 'static> SinkRegistry<T> {
    /// `capacity` bounds every subscriber channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders.lock().push((id, sender));
        Subscription { id, receiver }
    }

    /// Drops the sender, which closes the subscriber's channel once it has
    /// drained what was already queued.
    pub fn unsubscribe(&self, id: SinkId) -> bool {
        let mut senders = self.senders.lock();
        let before = senders.len();
        senders.retain(|(sink, _)| *sink != id);
        before != senders.len()
    }

    /// Non-blocking delivery to every subscriber. Returns how many accepted
    /// the event.
    pub fn publish(&self, event: T) -> usize {
        let mut delivered = 0;
        self.senders.lock().retain(|(id, sender)| {
            match sender.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    trace!(sink = id, "subscriber full, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
        delivered
    }

    /// Unsubscribes everyone. Receivers still get what was queued, then
    /// `None`.
    pub fn close_all(&self) -> usize {
        let mut senders = self.senders.lock();
        let closed = senders.len();
        senders.clear();
        closed
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.lock().is_empty()
    }
}
