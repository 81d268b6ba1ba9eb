use super::{BusConnection, ErrorObserver, MessageObserver, Transport};
use crate::device::DeviceId;
use crate::error::{BusError, ErrorKind};
use crate::observer::ObserverList;
use crate::task::Task;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Value of the `source` field on every command payload
pub const COMMAND_SOURCE: &str = "homeflux";

/// A command that reached the broker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedCommand {
    pub topic: String,
    pub payload: Value,
}

/// Publishes Tasks as command messages on `<namespace>/<type>/<location>/set`.
///
/// The connection is opened on first use and reused; a failed publish drops
/// it so the next call reconnects.
pub struct CommandPublisher {
    transport: Arc<dyn Transport>,
    namespace: String,
    client_id: String,
    /// Device type -> command topic segment; unmapped types are used as-is
    device_mappings: DashMap<String, String>,
    connection: Mutex<Option<Box<dyn BusConnection>>>,
    connected: AtomicBool,
    message_observers: ObserverList<MessageObserver>,
    error_observers: ObserverList<ErrorObserver>,
}

impl CommandPublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        namespace: &str,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            namespace: namespace.to_lowercase(),
            client_id: client_id.into(),
            device_mappings: DashMap::new(),
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
            message_observers: ObserverList::new("publisher.message"),
            error_observers: ObserverList::new("publisher.error"),
        }
    }

    /// Register an observer called with `(topic, payload)` after each publish
    pub fn on_message<F>(&self, observer: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.message_observers.register(Arc::new(observer));
    }

    /// Register an observer called with `(kind, error)` for failed publishes
    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(ErrorKind, &str) + Send + Sync + 'static,
    {
        self.error_observers.register(Arc::new(observer));
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Whether a live connection is currently held
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish commands for `device_type` under `topic_segment` instead
    pub fn add_device_mapping(&self, device_type: &str, topic_segment: &str) {
        self.device_mappings
            .insert(device_type.to_lowercase(), topic_segment.to_lowercase());
        info!(device_type = %device_type, topic_segment = %topic_segment, "Added device mapping");
    }

    pub fn command_topic(&self, device: &str) -> String {
        let mut id = DeviceId::parse(device);
        if let Some(segment) = self.device_mappings.get(&id.device_type) {
            id.device_type = segment.clone();
        }
        id.command_topic(&self.namespace)
    }

    /// Build the command payload: `action`, `timestamp`, `source`, then every
    /// Task field except `device` and `action`.
    pub fn build_payload(task: &Task) -> Value {
        let mut payload = Map::new();
        payload.insert("action".to_string(), Value::String(task.action.clone()));
        payload.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        payload.insert(
            "source".to_string(),
            Value::String(COMMAND_SOURCE.to_string()),
        );
        for (key, value) in &task.params {
            payload.insert(key.clone(), value.clone());
        }
        Value::Object(payload)
    }

    /// Publish one Task and wait for the broker to acknowledge it.
    pub async fn publish_task(&self, task: &Task) -> Result<PublishedCommand, BusError> {
        let topic = self.command_topic(&task.device);
        let payload = Self::build_payload(task);

        match self.publish(&topic, &payload).await {
            Ok(()) => {
                info!(topic = %topic, action = %task.action, "Published command");
                self.message_observers
                    .notify(|observer| observer(&topic, &payload));
                Ok(PublishedCommand { topic, payload })
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to publish command");
                self.error_observers
                    .notify(|observer| observer(e.kind(), &e.to_string()));
                Err(e)
            }
        }
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BusError> {
        let bytes =
            serde_json::to_vec(payload).map_err(|e| BusError::Unexpected(e.to_string()))?;

        let mut guard = self.connection.lock().await;

        // A session the broker already closed is replaced before publishing
        if guard.as_ref().is_some_and(|connection| !connection.is_alive()) {
            debug!(client_id = %self.client_id, "Command publisher session expired, reconnecting");
            guard.take();
            self.connected.store(false, Ordering::SeqCst);
        }

        // Connect lazily
        if guard.is_none() {
            let connection = self.transport.connect(&self.client_id).await?;
            debug!(client_id = %self.client_id, "Command publisher connected");
            *guard = Some(connection);
            self.connected.store(true, Ordering::SeqCst);
        }

        let result = match guard.as_mut() {
            Some(connection) => connection.publish(topic, bytes).await,
            None => Err(BusError::Unexpected("no connection".to_string())),
        };

        // Drop the session on failure so the next call reconnects
        if result.is_err() {
            if let Some(mut connection) = guard.take() {
                connection.disconnect().await;
            }
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Close the held connection, if any
    pub async fn disconnect(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            connection.disconnect().await;
            info!("Command publisher disconnected");
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn publisher(bus: &MemoryBus) -> CommandPublisher {
        CommandPublisher::new(Arc::new(bus.clone()), "home", "publisher-test")
    }

    #[test]
    fn test_command_topic() {
        let bus = MemoryBus::new();
        let publisher = publisher(&bus);
        assert_eq!(
            publisher.command_topic("light.LivingRoom"),
            "home/light/livingroom/set"
        );
        assert_eq!(publisher.command_topic("fan"), "home/fan/default/set");
    }

    #[test]
    fn test_device_mapping_rewrites_type_segment() {
        let bus = MemoryBus::new();
        let publisher = publisher(&bus);
        publisher.add_device_mapping("Plug", "switch");

        assert_eq!(
            publisher.command_topic("plug.coffee_maker"),
            "home/switch/coffee_maker/set"
        );
        // Unmapped types keep their own segment
        assert_eq!(
            publisher.command_topic("light.kitchen"),
            "home/light/kitchen/set"
        );
    }

    #[test]
    fn test_payload_carries_all_task_fields() {
        let task = Task::new("thermostat.main", "set_temperature")
            .with_value(20.0)
            .with_param("mode", "heat");
        let payload = CommandPublisher::build_payload(&task);

        assert_eq!(payload["action"], json!("set_temperature"));
        assert_eq!(payload["source"], json!("homeflux"));
        assert_eq!(payload["value"], json!(20.0));
        assert_eq!(payload["mode"], json!("heat"));
        assert!(payload.get("device").is_none());
        assert!(payload["timestamp"].as_str().is_some());
    }

    #[test]
    fn test_turn_on_is_not_rewritten() {
        let payload =
            CommandPublisher::build_payload(&Task::new("light.kitchen", "turn_on").with_value(true));
        assert_eq!(payload["action"], json!("turn_on"));
        assert_eq!(payload["value"], json!(true));
        assert!(payload.get("state").is_none());
    }

    #[tokio::test]
    async fn test_lazy_connect_and_reuse() {
        let bus = MemoryBus::new();
        let publisher = publisher(&bus);
        assert!(!publisher.is_connected());
        assert_eq!(bus.connect_attempts(), 0);

        publisher
            .publish_task(&Task::new("light.kitchen", "turn_on"))
            .await
            .unwrap();
        publisher
            .publish_task(&Task::new("light.kitchen", "turn_off"))
            .await
            .unwrap();

        assert!(publisher.is_connected());
        assert_eq!(bus.connect_attempts(), 1);
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published()[0].topic, "home/light/kitchen/set");
    }

    #[tokio::test]
    async fn test_failed_publish_drops_connection() {
        let bus = MemoryBus::new();
        let publisher = publisher(&bus);
        let kinds = Arc::new(StdMutex::new(Vec::new()));
        {
            let kinds = Arc::clone(&kinds);
            publisher.on_error(move |kind, _| kinds.lock().unwrap().push(kind));
        }

        bus.fail_next_publishes(1);
        let err = publisher
            .publish_task(&Task::new("lock.front_door", "lock"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert!(!publisher.is_connected());

        publisher
            .publish_task(&Task::new("lock.front_door", "lock"))
            .await
            .unwrap();
        assert_eq!(bus.connect_attempts(), 2);
        assert_eq!(*kinds.lock().unwrap(), vec![ErrorKind::TransportError]);
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced_before_publishing() {
        let bus = MemoryBus::new();
        let publisher = publisher(&bus);
        let errors = Arc::new(StdMutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            publisher.on_error(move |kind, _| errors.lock().unwrap().push(kind));
        }

        publisher
            .publish_task(&Task::new("lock.front_door", "lock"))
            .await
            .unwrap();

        // Broker dropped the idle session
        bus.expire_sessions();

        publisher
            .publish_task(&Task::new("lock.front_door", "unlock"))
            .await
            .unwrap();
        assert_eq!(bus.connect_attempts(), 2);
        assert_eq!(bus.published().len(), 2);
        assert!(errors.lock().unwrap().is_empty());
        assert!(publisher.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let bus = MemoryBus::new();
        bus.fail_next_connects(1);
        let publisher = publisher(&bus);

        let result = publisher
            .publish_task(&Task::new("fan.bedroom", "set_speed").with_value(2))
            .await;
        assert!(matches!(result, Err(BusError::Transport(_))));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_message_observer_sees_topic() {
        let bus = MemoryBus::new();
        let publisher = publisher(&bus);
        let topics = Arc::new(StdMutex::new(Vec::new()));
        {
            let topics = Arc::clone(&topics);
            publisher.on_message(move |topic, _| topics.lock().unwrap().push(topic.to_string()));
        }

        publisher
            .publish_task(&Task::new("switch.coffee_maker", "turn_on"))
            .await
            .unwrap();
        assert_eq!(*topics.lock().unwrap(), vec!["home/switch/coffee_maker/set"]);
    }
}
