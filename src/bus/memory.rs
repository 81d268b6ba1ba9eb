//! In-process loopback bus.
//!
//! Plays the broker (and the device peers behind it) without a network:
//! `inject` delivers a message to matching subscribers, every publish is
//! recorded and looped back, and connect/publish failures can be scripted.

use super::{topic_matches, BusConnection, BusMessage, Transport};
use crate::error::BusError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Delivery = Result<BusMessage, BusError>;
type Subscribers = Vec<(String, mpsc::UnboundedSender<Delivery>)>;

#[derive(Default)]
struct Inner {
    subscribers: Mutex<Subscribers>,
    published: Mutex<Vec<BusMessage>>,
    failing_connects: AtomicU32,
    failing_publishes: AtomicU32,
    connect_attempts: AtomicU32,
    /// Bumped by `expire_sessions`; connections from older epochs are dead
    epoch: AtomicU32,
}

impl Inner {
    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, message: &BusMessage) -> usize {
        let mut subscribers = self.subscribers();
        // Closed receivers belong to dropped connections
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, &message.topic))
            .filter(|(_, tx)| tx.send(Ok(message.clone())).is_ok())
            .count()
    }
}

/// Loopback transport shared by every connection cloned from it
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message as if a device peer had published it.
    /// Returns the number of subscriptions it reached.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.inner.deliver(&BusMessage::new(topic, payload))
    }

    /// Every message published through a connection, in order
    pub fn published(&self) -> Vec<BusMessage> {
        self.inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make the next `n` connect attempts fail with a transport error
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` publishes fail with a transport error
    pub fn fail_next_publishes(&self, n: u32) {
        self.inner.failing_publishes.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers();
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.len()
    }

    /// Fail every live subscription with `error` and drop it
    pub fn break_subscriptions(&self, error: BusError) {
        let subscribers = std::mem::take(&mut *self.inner.subscribers());
        for (_, tx) in subscribers {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// End every open session as a broker would after a keep-alive timeout
    pub fn expire_sessions(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.close_subscriptions();
    }

    /// End every live subscription without an error
    pub fn close_subscriptions(&self) {
        self.inner.subscribers().clear();
    }
}

/// Decrement `counter` if positive; true when a failure was consumed
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Transport for MemoryBus {
    async fn connect(&self, _client_id: &str) -> Result<Box<dyn BusConnection>, BusError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.failing_connects) {
            return Err(BusError::Transport("connection refused".to_string()));
        }

        Ok(Box::new(MemoryConnection {
            inner: Arc::clone(&self.inner),
            epoch: self.inner.epoch.load(Ordering::SeqCst),
            weak_tx: None,
            rx: None,
        }))
    }
}

struct MemoryConnection {
    inner: Arc<Inner>,
    epoch: u32,
    // Only the bus holds strong senders, so releasing its subscriptions
    // ends the stream for `recv`.
    weak_tx: Option<mpsc::WeakUnboundedSender<Delivery>>,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
}

#[async_trait]
impl BusConnection for MemoryConnection {
    async fn subscribe(&mut self, pattern: &str) -> Result<(), BusError> {
        let tx = match self.weak_tx.as_ref().and_then(|weak| weak.upgrade()) {
            Some(tx) => tx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.weak_tx = Some(tx.downgrade());
                self.rx = Some(rx);
                tx
            }
        };
        self.inner.subscribers().push((pattern.to_string(), tx));
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError> {
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| BusError::Unexpected("no active subscription".to_string()))?;

        match rx.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if !self.is_alive() {
            return Err(BusError::Transport("session expired".to_string()));
        }
        if take_failure(&self.inner.failing_publishes) {
            return Err(BusError::Transport("publish failed".to_string()));
        }

        let message = BusMessage::new(topic, payload);
        self.inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        self.inner.deliver(&message);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.epoch == self.inner.epoch.load(Ordering::SeqCst)
    }
}
