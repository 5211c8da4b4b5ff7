//! Fan-out of items to a dynamic set of subscribers.
//!
//! Each subscriber owns a bounded queue. `publish` never waits: when one
//! subscriber's queue is full, the new item is dropped for that subscriber
//! only, and a subscriber whose receiver is gone is unregistered on the spot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc::{self, error::TrySendError};

/// Subscriber handle id.
pub type SubscriberId = u64;

struct Inner<T> {
    next_id: SubscriberId,
    subscribers: BTreeMap<SubscriberId, mpsc::Sender<T>>,
    dropped: u64,
}

/// Cloneable fan-out point. Holds no history.
pub struct Broadcaster<T> {
    inner: Arc<Mutex<Inner<T>>>,
    capacity: usize,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Broadcaster {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone> Broadcaster<T> {
    /// `capacity` is the per-subscriber queue length (at least 1).
    pub fn new(capacity: usize) -> Self {
        Broadcaster {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 1,
                subscribers: BTreeMap::new(),
                dropped: 0,
            })),
            capacity: capacity.max(1),
        }
    }

    /// Register a subscriber. It sees only items published from now on.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        tracing::debug!(subscriber = id, "Subscriber added");

        Subscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Unknown or already-removed ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriberId) {
        remove(&self.inner, id);
    }

    /// Hand `item` to every current subscriber. Returns how many accepted it.
    pub fn publish(&self, item: T) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut delivered = 0;
        let mut full = 0;
        let mut gone = Vec::new();

        for (&id, tx) in inner.subscribers.iter() {
            match tx.try_send(item.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, "Subscriber queue full, dropping item");
                    full += 1;
                }
                Err(TrySendError::Closed(_)) => gone.push(id),
            }
        }

        inner.dropped += full;
        for id in gone {
            inner.subscribers.remove(&id);
            tracing::debug!(subscriber = id, "Subscriber closed, removed");
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Items dropped because a subscriber's queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap().dropped
    }
}

fn remove<T>(inner: &Mutex<Inner<T>>, id: SubscriberId) {
    if inner.lock().unwrap().subscribers.remove(&id).is_some() {
        tracing::debug!(subscriber = id, "Subscriber removed");
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: SubscriberId,
    rx: mpsc::Receiver<T>,
    owner: Weak<Mutex<Inner<T>>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next item, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop accepting new items. The broadcaster notices on its next
    /// `publish` and unregisters this subscriber.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Next item if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            remove(&inner, self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
