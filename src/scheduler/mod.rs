use crate::device::DeviceId;
use crate::state::{StateSnapshot, StateStore};
use crate::task::{ScheduledTask, Task};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};


/// Lowest priority, for anything the table does not name
pub const DEFAULT_PRIORITY: u8 = 5;

/// Seconds, for device types the table does not name
pub const DEFAULT_DURATION: f64 = 0.5;

/// Drops redundant Tasks, attaches ordering metadata and sorts by priority.
pub struct Scheduler {
    store: Arc<StateStore>,
    namespace: String,
}

impl Scheduler {
    pub fn new(store: Arc<StateStore>, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_lowercase(),
        }
    }

    /// Schedule `tasks` against one point-in-time snapshot of the store.
    ///
    /// The output is sorted ascending by priority; Tasks of equal priority
    /// keep their input order.
    pub fn schedule(&self, tasks: Vec<Task>) -> Vec<ScheduledTask> {
        if tasks.is_empty() {
            return Vec::new();
        }

        // One consistent view of state for the whole batch
        let snapshot = self.store.dump();
        let planned = tasks.len();

        // Drop redundant tasks, annotate the rest
        let mut scheduled: Vec<ScheduledTask> = tasks
            .into_iter()
            .filter(|task| {
                let redundant = self.is_redundant(task, &snapshot);
                if redundant {
                    debug!(device = %task.device, action = %task.action, "Skipping redundant task");
                }
                !redundant
            })
            .map(|task| ScheduledTask {
                priority: priority(&task),
                estimated_duration: estimated_duration(&task),
                scheduled_at: Utc::now(),
                task,
            })
            .collect();

        // Stable, so equal priorities keep their relative order
        scheduled.sort_by_key(|t| t.priority);

        info!(
            scheduled = scheduled.len(),
            filtered = planned - scheduled.len(),
            "Scheduled tasks"
        );
        scheduled
    }

    fn is_redundant(&self, task: &Task, snapshot: &StateSnapshot) -> bool {
        let key = task.device_id().state_key(&self.namespace).to_string();
        match snapshot.get(&key) {
            Some(current) => already_satisfied(task, current),
            // Absence of knowledge never suppresses a command
            None => false,
        }
    }
}

/// Whether the last-known payload already reflects what `task` asks for.
///
/// Only `turn_on`, `turn_off`, `set_brightness` and `set_temperature` can be
/// redundant; every other action always executes.
pub fn already_satisfied(task: &Task, current: &Value) -> bool {
    match task.action.as_str() {
        "turn_on" => current.get("state").and_then(Value::as_str) == Some("on"),
        "turn_off" => current.get("state").and_then(Value::as_str) == Some("off"),
        "set_brightness" => field_equals(current, "brightness", task.value()),
        "set_temperature" => field_equals(current, "target", task.value()),
        _ => false,
    }
}

fn field_equals(current: &Value, field: &str, requested: Option<&Value>) -> bool {
    match (current.get(field), requested) {
        (Some(have), Some(want)) => values_equal(have, want),
        _ => false,
    }
}

/// JSON equality where numbers compare by value, so `20` equals `20.0`
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// 1 for locks and security, 2 for lighting, 3 for climate, 5 otherwise
pub fn priority(task: &Task) -> u8 {
    let device = task.device_id();
    if matches!(device.device_type.as_str(), "lock" | "alarm")
        || matches!(task.action.as_str(), "lock" | "unlock")
    {
        return 1;
    }
    match device.device_type.as_str() {
        "light" => 2,
        "thermostat" | "fan" => 3,
        _ => DEFAULT_PRIORITY,
    }
}

/// Expected execution time in seconds, by device type
pub fn estimated_duration(task: &Task) -> f64 {
    duration_for(&task.device_id())
}

fn duration_for(device: &DeviceId) -> f64 {
    match device.device_type.as_str() {
        "light" => 0.5,
        "switch" => 0.2,
        "thermostat" => 1.0,
        "lock" => 0.8,
        "fan" => 0.6,
        _ => DEFAULT_DURATION,
    }
}
