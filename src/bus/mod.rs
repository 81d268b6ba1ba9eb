// Message bus integration: transports, state ingestion, command publishing

mod ingest;
mod memory;
mod mqtt;
mod publisher;

pub use ingest::{IngestPhase, IngestionAgent, IngestionStatus, ReconnectPolicy};
pub use memory::MemoryBus;
pub use mqtt::{MqttConfig, MqttTransport};
pub use publisher::{CommandPublisher, PublishedCommand};

use crate::error::{BusError, ErrorKind};
use async_trait::async_trait;
use serde_json::Value;

/// Observer invoked with `(key or topic, payload)`
pub type MessageObserver = dyn Fn(&str, &Value) + Send + Sync;

/// Observer invoked with `(kind, error text)`
pub type ErrorObserver = dyn Fn(ErrorKind, &str) + Send + Sync;

/// A raw message received from the bus
#[derive(Clone, Debug, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Opens connections to a topic-based pub/sub bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and wait until the broker has accepted the session
    async fn connect(&self, client_id: &str) -> Result<Box<dyn BusConnection>, BusError>;
}

/// One live bus session, owned by exactly one component.
#[async_trait]
pub trait BusConnection: Send {
    /// Subscribe and wait for the broker to acknowledge
    async fn subscribe(&mut self, pattern: &str) -> Result<(), BusError>;

    /// Wait for the next message on any subscription.
    ///
    /// `Ok(None)` means the session ended without a transport error.
    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError>;

    /// Publish and wait for the broker to acknowledge
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// False once the session has ended on the broker side
    fn is_alive(&self) -> bool {
        true
    }

    /// Close the session; errors are ignored
    async fn disconnect(&mut self) {}
}

/// MQTT-style topic filter matching (`+` one level, `#` the remainder).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
