use crate::bus::{CommandPublisher, IngestionAgent, IngestionStatus, Transport};
use crate::config::HubConfig;
use crate::device::{DeviceId, DeviceIdError, DeviceStateKey};
use crate::dispatcher::{BatchMode, BatchResult, DispatchStats, Dispatcher, ExecutionRecord};
use crate::history::{InteractionEntry, InteractionHistory, InteractionKind};
use crate::preferences::{InMemoryPreferences, PreferenceSource};
use crate::planner::Planner;
use crate::scheduler::Scheduler;
use crate::state::{StateSnapshot, StateStore};
use crate::task::{ScheduledTask, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;


/// Result of running a goal through plan, schedule and dispatch
#[derive(Debug, Clone, Serialize)]
pub struct GoalOutcome {
    pub message: String,
    pub tasks_planned: usize,
    pub tasks_scheduled: usize,
    pub tasks_executed: usize,
    /// Seconds
    pub execution_time: f64,
    pub tasks: Vec<ScheduledTask>,
}

/// A direct device command, bypassing the planner
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCommand {
    pub device_id: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl DeviceCommand {
    pub fn new(device_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            action: action.into(),
            parameters: Map::new(),
        }
    }

    pub fn into_task(self) -> Task {
        let mut task = Task::new(self.device_id, self.action);
        task.params = self.parameters;
        task
    }
}

/// Outcome of one direct device command
#[derive(Debug, Clone, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub device_id: String,
    pub action: String,
    pub task: Task,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: f64,
}

/// A device known from its state key
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub device_id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    pub state: Value,
    /// `timestamp` field of the payload, when the device reports one
    pub last_updated: Option<Value>,
}

/// Detailed status of one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    pub state: Value,
    pub state_key: String,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Why a device status lookup failed
#[derive(Debug, Error)]
pub enum DeviceLookupError {
    #[error(transparent)]
    InvalidId(#[from] DeviceIdError),

    #[error("device {0} not found")]
    NotFound(String),
}

/// Process-lifetime context owning one instance of every pipeline component.
pub struct Hub {
    namespace: String,
    store: Arc<StateStore>,
    preferences: Arc<InMemoryPreferences>,
    planner: Planner,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    ingestion: Arc<IngestionAgent>,
    interactions: InteractionHistory,
    stop_tx: watch::Sender<bool>,
}

fn client_id(prefix: &str, role: &str) -> String {
    format!("{}-{}-{}", prefix, role, Uuid::new_v4().simple())
}

impl Hub {
    pub fn new(config: &HubConfig, transport: Arc<dyn Transport>) -> Self {
        let namespace = config.topics.namespace.to_lowercase();
        let prefix = &config.mqtt.client_id_prefix;

        let store = Arc::new(StateStore::new());
        let preferences = Arc::new(InMemoryPreferences::new());
        let planner = Planner::new(Arc::clone(&preferences) as Arc<dyn PreferenceSource>);
        let scheduler = Scheduler::new(Arc::clone(&store), &namespace);

        let publisher = Arc::new(CommandPublisher::new(
            Arc::clone(&transport),
            &namespace,
            client_id(prefix, "executor"),
        ));
        for (device_type, topic_segment) in &config.topics.device_mappings {
            publisher.add_device_mapping(device_type, topic_segment);
        }
        let dispatcher = Dispatcher::with_capacity(publisher, config.dispatch.history_capacity);

        let ingestion = Arc::new(IngestionAgent::new(
            transport,
            Arc::clone(&store),
            &namespace,
            client_id(prefix, "sensor"),
            config.ingestion.reconnect_policy(),
        ));

        let (stop_tx, _) = watch::channel(false);

        Self {
            namespace,
            store,
            preferences,
            planner,
            scheduler,
            dispatcher,
            ingestion,
            interactions: InteractionHistory::new(),
            stop_tx,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn preferences(&self) -> &Arc<InMemoryPreferences> {
        &self.preferences
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ingestion(&self) -> &Arc<IngestionAgent> {
        &self.ingestion
    }

    pub fn interactions(&self) -> &InteractionHistory {
        &self.interactions
    }

    /// Spawn the ingestion loop on the current runtime
    pub fn start_ingestion(&self) -> JoinHandle<()> {
        self.stop_tx.send_replace(false);
        let stop_rx = self.stop_tx.subscribe();
        tokio::spawn(Arc::clone(&self.ingestion).run(stop_rx))
    }

    /// Signal the ingestion loop to stop; it exits at its next wait point
    pub fn stop_ingestion(&self) {
        self.stop_tx.send_replace(true);
        info!("Ingestion stop requested");
    }

    pub fn ingestion_status(&self) -> IngestionStatus {
        self.ingestion.status()
    }

    pub fn plan_and_schedule(&self, user_id: &str, goal: &str) -> Vec<ScheduledTask> {
        let tasks = self.planner.plan_goal(user_id, goal);
        self.scheduler.schedule(tasks)
    }

    /// Plan, schedule and dispatch a goal, in priority order
    pub async fn process_goal(&self, user_id: &str, goal: &str) -> GoalOutcome {
        let started = Instant::now();
        info!(user_id = %user_id, goal = %goal, "Processing goal");
        self.interactions.record(
            user_id,
            InteractionKind::GoalRequest,
            json!({ "goal": goal }),
        );

        let planned = self.planner.plan_goal(user_id, goal);
        let tasks_planned = planned.len();
        let scheduled = self.scheduler.schedule(planned);

        // Dispatch in priority order, one at a time
        let mut tasks_executed = 0;
        let mut results = Vec::with_capacity(scheduled.len());
        for scheduled_task in &scheduled {
            let success = self.dispatcher.execute(&scheduled_task.task).await;
            if success {
                tasks_executed += 1;
            }
            results.push(json!({ "task": scheduled_task.task, "success": success }));
        }

        let execution_time = started.elapsed().as_secs_f64();
        self.interactions.record(
            user_id,
            InteractionKind::GoalExecution,
            json!({
                "goal": goal,
                "tasks_planned": tasks_planned,
                "tasks_scheduled": scheduled.len(),
                "tasks_executed": tasks_executed,
                "execution_time": execution_time,
                "results": results,
            }),
        );
        info!(
            executed = tasks_executed,
            scheduled = scheduled.len(),
            execution_time,
            "Goal processed"
        );

        GoalOutcome {
            message: format!("Goal '{}' processed successfully", goal),
            tasks_planned,
            tasks_scheduled: scheduled.len(),
            tasks_executed,
            execution_time,
            tasks: scheduled,
        }
    }

    /// Store a preference from its raw string form and log the change
    pub fn set_preference(&self, user_id: &str, key: &str, raw: &str) -> Value {
        let value = self.preferences.set_preference(user_id, key, raw);
        self.interactions.record(
            user_id,
            InteractionKind::PreferenceChange,
            json!({ "key": key, "value": value }),
        );
        value
    }

    pub fn user_history(&self, user_id: &str, limit: usize) -> Vec<InteractionEntry> {
        self.interactions.get(user_id, limit)
    }

    pub fn clear_user_history(&self, user_id: &str) -> bool {
        self.interactions.clear(user_id)
    }

    pub async fn dispatch(&self, task: &Task) -> bool {
        self.dispatcher.execute(task).await
    }

    pub async fn dispatch_batch(&self, tasks: &[Task], mode: BatchMode) -> BatchResult {
        self.dispatcher.execute_batch(tasks, mode).await
    }

    pub fn query_state(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    pub fn query_all_state(&self) -> StateSnapshot {
        self.store.dump()
    }

    pub fn execution_history(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.dispatcher.history(limit)
    }

    pub fn execution_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Execute a direct command
    pub async fn control_device(&self, command: DeviceCommand) -> ControlOutcome {
        let started = Instant::now();
        let timestamp = Utc::now();
        let device_id = command.device_id.clone();
        let action = command.action.clone();
        let task = command.into_task();

        let success = self.dispatcher.execute(&task).await;

        ControlOutcome {
            success,
            device_id,
            action,
            task,
            timestamp,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Flip a device based on its last-known `state`; unknown devices turn on
    pub async fn toggle_device(&self, device_id: &str) -> ControlOutcome {
        let action = toggle_action(self.state_of(device_id).as_ref());
        self.control_device(DeviceCommand::new(device_id, action)).await
    }

    /// Send action `set` with a single `{parameter: value}` field
    pub async fn set_device_parameter(
        &self,
        device_id: &str,
        parameter: &str,
        value: Value,
    ) -> ControlOutcome {
        let mut command = DeviceCommand::new(device_id, "set");
        command.parameters.insert(parameter.to_string(), value);
        self.control_device(command).await
    }

    fn state_of(&self, device_id: &str) -> Option<Value> {
        let key = DeviceId::parse(device_id).state_key(&self.namespace);
        self.store.get(&key.to_string())
    }

    /// Every device with a stored state key in this namespace
    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        let snapshot = self.store.dump();
        snapshot
            .entries
            .iter()
            .filter_map(|(key, state)| {
                let parsed = DeviceStateKey::from_topic(key)?;
                if parsed.namespace != self.namespace {
                    return None;
                }
                Some(DeviceSummary {
                    device_id: parsed.device_id().to_string(),
                    device_type: parsed.device_type,
                    name: parsed.location,
                    state: state.clone(),
                    last_updated: state.get("timestamp").cloned(),
                })
            })
            .collect()
    }

    /// Status of one device; the id must be exactly `type.name`
    pub fn device_status(&self, device_id: &str) -> Result<DeviceStatus, DeviceLookupError> {
        let id = DeviceId::parse_strict(device_id)?;
        let state_key = id.state_key(&self.namespace).to_string();

        let state = self
            .store
            .get_state(&state_key)
            .ok_or_else(|| DeviceLookupError::NotFound(device_id.to_string()))?;

        Ok(DeviceStatus {
            device_id: id.to_string(),
            device_type: id.device_type,
            name: id.location,
            state: state.payload,
            state_key,
            last_updated: Some(state.last_updated),
        })
    }
}

/// `turn_off` when `state` is "on", "true" or `true`, otherwise `turn_on`
pub fn toggle_action(current: Option<&Value>) -> &'static str {
    let is_on = match current.and_then(|payload| payload.get("state")) {
        Some(Value::String(s)) => s == "on" || s == "true",
        Some(Value::Bool(b)) => *b,
        _ => false,
    };
    if is_on {
        "turn_off"
    } else {
        "turn_on"
    }
}
