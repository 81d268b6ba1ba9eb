use super::{BusConnection, ErrorObserver, MessageObserver, Transport};
use crate::device::{normalize_key, state_topic_pattern};
use crate::error::{BusError, DecodeError, ErrorKind};
use crate::observer::ObserverList;
use crate::state::StateStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Connection lifecycle of the ingestion loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPhase {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
}

/// Delay before reconnecting, by failure tier.
///
/// Transport failures (broker unreachable, connection dropped) retry on the
/// short tier; anything unclassified waits on the long tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub transport_delay: Duration,
    pub unexpected_delay: Duration,
}

impl ReconnectPolicy {
    pub fn fixed_tiers(transport_delay: Duration, unexpected_delay: Duration) -> Self {
        Self {
            transport_delay,
            unexpected_delay,
        }
    }

    pub fn delay_for(&self, kind: ErrorKind) -> Duration {
        match kind {
            ErrorKind::TransportError => self.transport_delay,
            _ => self.unexpected_delay,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed_tiers(Duration::from_secs(5), Duration::from_secs(10))
    }
}

/// Snapshot of the agent for status endpoints
#[derive(Debug, Clone, Serialize)]
pub struct IngestionStatus {
    pub running: bool,
    pub phase: IngestPhase,
    pub topic_pattern: String,
    pub client_id: String,
    pub messages_received: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
    pub stored_keys: usize,
}

/// Keeps the StateStore in sync with device state topics.
///
/// `run` is a permanent loop: connect, subscribe to
/// `<namespace>/+/+/state`, feed every message into the store, and on any
/// failure back off and start over. Only the stop signal ends it.
pub struct IngestionAgent {
    transport: Arc<dyn Transport>,
    store: Arc<StateStore>,
    topic_pattern: String,
    client_id: String,
    policy: ReconnectPolicy,
    message_observers: ObserverList<MessageObserver>,
    error_observers: ObserverList<ErrorObserver>,
    phase: RwLock<IngestPhase>,
    running: AtomicBool,
    messages_received: AtomicU64,
    decode_errors: AtomicU64,
    reconnects: AtomicU64,
}

/// Resolves once `stop` carries `true`. A dropped sender never stops the loop.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl IngestionAgent {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<StateStore>,
        namespace: &str,
        client_id: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            transport,
            store,
            topic_pattern: state_topic_pattern(namespace),
            client_id: client_id.into(),
            policy,
            message_observers: ObserverList::new("ingestion.message"),
            error_observers: ObserverList::new("ingestion.error"),
            phase: RwLock::new(IngestPhase::Disconnected),
            running: AtomicBool::new(false),
            messages_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    /// Register an observer called with `(key, payload)` after each store update
    pub fn on_message<F>(&self, observer: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.message_observers.register(Arc::new(observer));
    }

    /// Register an observer called with `(kind, error)` for every failure
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(ErrorKind, &str) + Send + Sync + 'static,
    {
        self.error_observers.register(Arc::new(observer));
    }

    pub fn topic_pattern(&self) -> &str {
        &self.topic_pattern
    }

    pub fn phase(&self) -> IngestPhase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: IngestPhase) {
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> IngestionStatus {
        IngestionStatus {
            running: self.is_running(),
            phase: self.phase(),
            topic_pattern: self.topic_pattern.clone(),
            client_id: self.client_id.clone(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            stored_keys: self.store.len(),
        }
    }

    fn notify_error(&self, kind: ErrorKind, error: &str) {
        self.error_observers.notify(|observer| observer(kind, error));
    }

    /// Decode one state message and store it.
    ///
    /// A payload that is not JSON is dropped and reported to error observers;
    /// the store is left untouched.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<(), DecodeError> {
        self.messages_received.fetch_add(1, Ordering::Relaxed);

        // Decode; any JSON value is accepted
        let decoded: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(source) => {
                let err = DecodeError {
                    topic: topic.to_string(),
                    source,
                };
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %topic, error = %err, "Failed to decode state payload, dropping");
                self.notify_error(err.kind(), &err.to_string());
                return Err(err);
            }
        };

        // Store, then notify
        let key = normalize_key(topic);
        self.store.update(&key, decoded.clone());
        debug!(key = %key, "Stored device state");

        self.message_observers
            .notify(|observer| observer(&key, &decoded));

        Ok(())
    }

    /// Run until `stop` carries `true`. Never returns an error.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Ingestion agent is already running");
            return;
        }

        info!(
            topic_pattern = %self.topic_pattern,
            client_id = %self.client_id,
            "Starting ingestion agent"
        );

        loop {
            match self.run_session(&mut stop).await {
                Ok(()) => break,
                Err(e) => {
                    self.set_phase(IngestPhase::Disconnected);
                    let kind = e.kind();
                    match kind {
                        ErrorKind::TransportError => error!(error = %e, "Bus transport error"),
                        _ => error!(error = %e, "Unexpected error in ingestion agent"),
                    }
                    self.notify_error(kind, &e.to_string());

                    // Back off by error class, staying responsive to stop
                    let delay = self.policy.delay_for(kind);
                    info!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut stop) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.set_phase(IngestPhase::Disconnected);
        self.running.store(false, Ordering::SeqCst);
        info!("Ingestion agent stopped");
    }

    /// One connect/subscribe/receive cycle. `Ok` means stop was requested.
    async fn run_session(&self, stop: &mut watch::Receiver<bool>) -> Result<(), BusError> {
        // Connect
        self.set_phase(IngestPhase::Connecting);
        let mut connection: Box<dyn BusConnection> = tokio::select! {
            biased;
            _ = stop_requested(stop) => return Ok(()),
            connected = self.transport.connect(&self.client_id) => connected?,
        };

        // Subscribe to every device's state topic
        let subscribed = tokio::select! {
            biased;
            _ = stop_requested(stop) => None,
            subscribed = connection.subscribe(&self.topic_pattern) => Some(subscribed),
        };
        match subscribed {
            None => {
                connection.disconnect().await;
                return Ok(());
            }
            Some(result) => result?,
        }

        self.set_phase(IngestPhase::Subscribed);
        info!(topic_pattern = %self.topic_pattern, "Subscribed to state topics");

        // Receive until stopped or the session fails
        self.set_phase(IngestPhase::Receiving);
        loop {
            let next = tokio::select! {
                biased;
                _ = stop_requested(stop) => None,
                next = connection.next_message() => Some(next),
            };

            match next {
                // Stop requested
                None => {
                    connection.disconnect().await;
                    return Ok(());
                }
                Some(Ok(Some(message))) => {
                    // Decode failures are reported inside and never end the session
                    let _ = self.handle_message(&message.topic, &message.payload);
                }
                Some(Ok(None)) => {
                    return Err(BusError::Unexpected(
                        "message stream ended unexpectedly".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }
}
