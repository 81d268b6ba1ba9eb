use crate::device::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod validation;

pub use validation::{validate_task, TaskError};

/// Task is a single planned device command.
///
/// `device` and `action` are the only fields the pipeline requires; every
/// other field (`value`, `reason`, device-specific parameters) lives in the
/// open `params` map and travels with the command payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Device identifier in `type.location` form
    #[serde(default)]
    pub device: String,

    /// Command name (e.g. "turn_on", "set_brightness")
    #[serde(default)]
    pub action: String,

    /// Remaining fields
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Task {
    pub fn new(device: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            action: action.into(),
            params: Map::new(),
        }
    }

    pub fn with_value(self, value: impl Into<Value>) -> Self {
        self.with_param("value", value)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn value(&self) -> Option<&Value> {
        self.params.get("value")
    }

    /// Explanation attached by the planner's fallback branch
    pub fn reason(&self) -> Option<&str> {
        self.params.get("reason").and_then(|v| v.as_str())
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::parse(&self.device)
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        validation::validate_task(self)
    }
}

/// A Task that survived scheduling, annotated with ordering metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(flatten)]
    pub task: Task,

    /// Lower is more urgent
    pub priority: u8,

    /// Expected execution time in seconds
    pub estimated_duration: f64,

    pub scheduled_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn into_task(self) -> Task {
        self.task
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_serializes_flat() {
        let task = Task::new("light.bedroom", "set_brightness").with_value(10);
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value,
            json!({"device": "light.bedroom", "action": "set_brightness", "value": 10})
        );
    }

    #[test]
    fn test_task_deserializes_extra_params() {
        let task: Task = serde_json::from_value(json!({
            "device": "light.kitchen",
            "action": "set_color",
            "value": "#4ECDC4",
            "transition": 2
        }))
        .unwrap();

        assert_eq!(task.device, "light.kitchen");
        assert_eq!(task.value(), Some(&json!("#4ECDC4")));
        assert_eq!(task.params.get("transition"), Some(&json!(2)));
    }

    #[test]
    fn test_missing_fields_deserialize_empty() {
        // Validation happens at dispatch time, not at the JSON boundary
        let task: Task = serde_json::from_value(json!({"value": 1})).unwrap();
        assert!(task.device.is_empty());
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_scheduled_task_keeps_original_fields() {
        let scheduled = ScheduledTask {
            task: Task::new("lock.front_door", "lock").with_value(true),
            priority: 1,
            estimated_duration: 0.8,
            scheduled_at: Utc::now(),
        };

        let value = serde_json::to_value(&scheduled).unwrap();
        assert_eq!(value["device"], json!("lock.front_door"));
        assert_eq!(value["priority"], json!(1));

        let back: ScheduledTask = serde_json::from_value(value).unwrap();
        assert_eq!(back.task, scheduled.task);
        assert!(!back.task.params.contains_key("priority"));
    }
}
