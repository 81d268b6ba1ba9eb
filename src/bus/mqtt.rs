use super::{BusConnection, BusMessage, Transport};
use crate::error::BusError;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info};

/// MQTT broker configuration
#[derive(Clone, Debug, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound on waiting for CONNACK, SUBACK and PUBACK
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_host() -> String {
    std::env::var("MQTT_BROKER_HOST").unwrap_or_else(|_| "localhost".to_string())
}

fn default_port() -> u16 {
    std::env::var("MQTT_BROKER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1883)
}

fn default_client_id_prefix() -> String {
    "homeflux".to_string()
}

fn default_keep_alive_secs() -> u64 {
    15
}

fn default_ack_timeout_ms() -> u64 {
    5000
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            ack_timeout_ms: default_ack_timeout_ms(),
            username: None,
            password: None,
        }
    }
}

impl MqttConfig {
    /// Broker address for logging
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Transport backed by an MQTT broker via `rumqttc`
#[derive(Clone, Debug)]
pub struct MqttTransport {
    config: MqttConfig,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, client_id: &str) -> Result<Box<dyn BusConnection>, BusError> {
        info!(broker = %self.config.broker(), client_id = %client_id, "Connecting to MQTT broker");

        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 10);
        let (message_tx, messages) = mpsc::unbounded_channel();
        let (ack_tx, acks) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));

        // The event loop runs for the whole session so keep-alive pings go
        // out while no call is waiting on this connection
        let driver = tokio::spawn(drive_eventloop(
            eventloop,
            client_id.to_string(),
            message_tx,
            ack_tx,
            Arc::clone(&alive),
        ));

        let mut connection = MqttConnection {
            client,
            messages,
            acks,
            alive,
            driver,
            ack_timeout: self.config.ack_timeout(),
        };

        // Dropping the connection on failure aborts the driver
        connection
            .wait_for("CONNACK", |ack| match ack {
                Ack::Connected => Some(Ok(())),
                _ => None,
            })
            .await?;
        info!(broker = %self.config.broker(), "Connected to MQTT broker");

        Ok(Box::new(connection))
    }
}

/// Acknowledgements handed from the driver task to the waiting call
#[derive(Debug)]
enum Ack {
    Connected,
    Subscribed(Result<(), BusError>),
    Published,
    /// The session ended; carries the transport error, if any
    Closed(Option<BusError>),
}

/// Poll the event loop until the session ends. Publishes go to `messages`,
/// acknowledgements to `acks`.
async fn drive_eventloop(
    mut eventloop: EventLoop,
    client_id: String,
    messages: mpsc::UnboundedSender<Result<BusMessage, BusError>>,
    acks: mpsc::UnboundedSender<Ack>,
    alive: Arc<AtomicBool>,
) {
    let error = loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = messages.send(Ok(BusMessage::new(
                    publish.topic,
                    publish.payload.to_vec(),
                )));
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    let _ = acks.send(Ack::Connected);
                } else {
                    break Some(BusError::Transport(format!(
                        "connection refused: {:?}",
                        ack.code
                    )));
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                let result = if rejected {
                    Err(BusError::Transport("subscription rejected".to_string()))
                } else {
                    Ok(())
                };
                let _ = acks.send(Ack::Subscribed(result));
            }
            Ok(Event::Incoming(Packet::PubAck(_))) => {
                let _ = acks.send(Ack::Published);
            }
            // Broker or local side ended the session cleanly
            Ok(Event::Incoming(Packet::Disconnect)) | Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                break None;
            }
            Ok(_) => {}
            Err(e) => break Some(BusError::Transport(e.to_string())),
        }
    };

    alive.store(false, Ordering::SeqCst);
    match &error {
        Some(e) => debug!(client_id = %client_id, error = %e, "MQTT session lost"),
        None => debug!(client_id = %client_id, "MQTT session closed"),
    }

    if let Some(e) = &error {
        let _ = messages.send(Err(e.clone()));
    }
    let _ = acks.send(Ack::Closed(error));
}

/// One MQTT session. A spawned driver task owns the rumqttc event loop;
/// this side issues requests and waits on the channels it feeds.
struct MqttConnection {
    client: AsyncClient,
    messages: mpsc::UnboundedReceiver<Result<BusMessage, BusError>>,
    acks: mpsc::UnboundedReceiver<Ack>,
    alive: Arc<AtomicBool>,
    driver: JoinHandle<()>,
    ack_timeout: Duration,
}

impl MqttConnection {
    /// Discard acknowledgements left over from a request that timed out
    fn drain_stale_acks(&mut self) -> Result<(), BusError> {
        while let Ok(ack) = self.acks.try_recv() {
            if let Ack::Closed(error) = ack {
                return Err(closed_error(error));
            }
        }
        Ok(())
    }

    /// Wait until `accept` takes an acknowledgement from the driver
    async fn wait_for<F>(&mut self, what: &str, mut accept: F) -> Result<(), BusError>
    where
        F: FnMut(Ack) -> Option<Result<(), BusError>> + Send,
    {
        let ack_timeout = self.ack_timeout;
        let acks = &mut self.acks;
        let waited = timeout(ack_timeout, async {
            loop {
                match acks.recv().await {
                    Some(Ack::Closed(error)) => return Err(closed_error(error)),
                    Some(ack) => {
                        if let Some(result) = accept(ack) {
                            return result;
                        }
                    }
                    None => return Err(closed_error(None)),
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(BusError::Transport(format!(
                "timed out after {}ms waiting for {}",
                ack_timeout.as_millis(),
                what
            ))),
        }
    }
}

fn closed_error(error: Option<BusError>) -> BusError {
    error.unwrap_or_else(|| BusError::Transport("MQTT session closed".to_string()))
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl BusConnection for MqttConnection {
    async fn subscribe(&mut self, pattern: &str) -> Result<(), BusError> {
        self.drain_stale_acks()?;
        self.client
            .subscribe(pattern, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        self.wait_for("SUBACK", |ack| match ack {
            Ack::Subscribed(result) => Some(result),
            _ => None,
        })
        .await?;

        debug!(pattern = %pattern, "MQTT subscription acknowledged");
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<BusMessage>, BusError> {
        match self.messages.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            // Driver finished without an error
            None => Ok(None),
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.drain_stale_acks()?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BusError::Transport(e.to_string()))?;

        self.wait_for("PUBACK", |ack| match ack {
            Ack::Published => Some(Ok(())),
            _ => None,
        })
        .await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}
