use super::Task;
use thiserror::Error;

/// Validation errors for Task
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("task must contain a non-empty 'device' field")]
    MissingDevice,

    #[error("task must contain a non-empty 'action' field")]
    MissingAction,
}

/// Validates a Task before it is handed to the bus.
///
/// Only `device` and `action` are checked; parameters are opaque.
pub fn validate_task(task: &Task) -> Result<(), TaskError> {
    if task.device.trim().is_empty() {
        return Err(TaskError::MissingDevice);
    }
    if task.action.trim().is_empty() {
        return Err(TaskError::MissingAction);
    }
    Ok(())
}
