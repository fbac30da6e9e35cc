//! In-process multicast channel.
//!
//! A [`Multicast`] fans every published event out to all live subscribers.
//! Each subscriber gets its own unbounded queue, so a slow consumer buffers
//! instead of blocking the publisher or its peers. Subscribers only see
//! events published after they subscribed; there is no replay. Dropping a
//! [`Subscription`] deregisters it and releases its buffer.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Registry<T> {
    senders: RwLock<HashMap<Uuid, mpsc::UnboundedSender<T>>>,
}

/// Single-publisher, many-subscriber event channel.
pub struct Multicast<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Multicast<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                senders: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a new subscriber. It will receive every event published
    /// after this call, in publish order.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext));

        self.registry
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        tracing::debug!(subscriber = %id, "multicast subscriber registered");

        Subscription {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: Clone> Multicast<T> {
    /// Deliver an event to every current subscriber without blocking.
    ///
    /// Enqueueing into an unbounded per-subscriber queue never waits on the
    /// consumer. Subscribers whose receiving end is gone are pruned. Returns
    /// the number of subscribers the event was delivered to.
    pub fn publish(&self, event: T) -> usize {
        let mut dead: Vec<Uuid> = Vec::new();
        let mut delivered = 0usize;

        {
            let senders = self
                .registry
                .senders
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            for (id, tx) in senders.iter() {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut senders = self
                .registry
                .senders
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for id in &dead {
                senders.remove(id);
                tracing::debug!(subscriber = %id, "pruned closed multicast subscriber");
            }
        }

        delivered
    }
}

impl<T> Default for Multicast<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Live event feed handed out by [`Multicast::subscribe`].
///
/// Implements [`Stream`]; waiting for the next event holds no lock.
pub struct Subscription<T> {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<T>,
    registry: Arc<Registry<T>>,
}

impl<T> Subscription<T> {
    /// Receive the next event, waiting if none is buffered.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receive an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.registry
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
