use crate::bus::CommandPublisher;
use crate::error::{BusError, ErrorKind};
use crate::observer::ObserverList;
use crate::task::{Task, TaskError};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{error, info, warn};


pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

type SuccessObserver = dyn Fn(&Task) + Send + Sync;
type FailureObserver = dyn Fn(ErrorKind, &Task, &str) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// Outcome of one dispatched Task
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub task: Task,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a batch is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_index: usize,
    pub task: Task,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<TaskResult>,
}

/// Counters over the current history window
#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    pub success_rate: f64,
    pub connected: bool,
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error("invalid task: {0}")]
    Invalid(#[from] TaskError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl DispatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Invalid(_) => ErrorKind::ValidationError,
            DispatchError::Bus(e) => e.kind(),
        }
    }
}

/// Executes Tasks through the CommandPublisher and records every outcome.
///
/// Failures never escape as panics or errors: `execute` reports a bool,
/// records the failure in history and notifies error observers.
pub struct Dispatcher {
    publisher: Arc<CommandPublisher>,
    history: Mutex<VecDeque<ExecutionRecord>>,
    capacity: usize,
    success_observers: ObserverList<SuccessObserver>,
    error_observers: ObserverList<FailureObserver>,
}

impl Dispatcher {
    pub fn new(publisher: Arc<CommandPublisher>) -> Self {
        Self::with_capacity(publisher, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(publisher: Arc<CommandPublisher>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            publisher,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            success_observers: ObserverList::new("dispatch.success"),
            error_observers: ObserverList::new("dispatch.error"),
        }
    }

    pub fn publisher(&self) -> &Arc<CommandPublisher> {
        &self.publisher
    }

    pub fn on_success<F>(&self, observer: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.success_observers.register(Arc::new(observer));
    }

    pub fn on_error<F>(&self, observer: F)
    where
        F: Fn(ErrorKind, &Task, &str) + Send + Sync + 'static,
    {
        self.error_observers.register(Arc::new(observer));
    }

    fn history_guard(&self) -> MutexGuard<'_, VecDeque<ExecutionRecord>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, record: ExecutionRecord) {
        let mut history = self.history_guard();
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Execute one Task; true when the broker accepted the command
    pub async fn execute(&self, task: &Task) -> bool {
        self.try_execute(task).await.is_ok()
    }

    async fn try_execute(&self, task: &Task) -> Result<(), DispatchError> {
        let outcome = match task.validate() {
            Ok(()) => self
                .publisher
                .publish_task(task)
                .await
                .map_err(DispatchError::from),
            Err(e) => Err(DispatchError::from(e)),
        };

        match outcome {
            Ok(command) => {
                info!(device = %task.device, action = %task.action, "Task executed");
                self.record(ExecutionRecord {
                    timestamp: Utc::now(),
                    task: task.clone(),
                    topic: Some(command.topic),
                    payload: Some(command.payload),
                    status: ExecutionStatus::Success,
                    error: None,
                });
                self.success_observers.notify(|observer| observer(task));
                Ok(())
            }
            Err(e) => {
                let kind = e.kind();
                let message = e.to_string();
                match kind {
                    ErrorKind::ValidationError => {
                        warn!(task = ?task, error = %message, "Rejected task")
                    }
                    _ => error!(device = %task.device, error = %message, "Task execution failed"),
                }
                self.record(ExecutionRecord {
                    timestamp: Utc::now(),
                    task: task.clone(),
                    topic: None,
                    payload: None,
                    status: ExecutionStatus::Failed,
                    error: Some(message.clone()),
                });
                self.error_observers
                    .notify(|observer| observer(kind, task, &message));
                Err(e)
            }
        }
    }

    /// Execute a batch. A failing Task never affects the others.
    pub async fn execute_batch(&self, tasks: &[Task], mode: BatchMode) -> BatchResult {
        info!(count = tasks.len(), mode = ?mode, "Executing batch");

        let outcomes: Vec<Result<(), DispatchError>> = match mode {
            BatchMode::Sequential => {
                let mut outcomes = Vec::with_capacity(tasks.len());
                for task in tasks {
                    outcomes.push(self.try_execute(task).await);
                }
                outcomes
            }
            BatchMode::Parallel => join_all(tasks.iter().map(|task| self.try_execute(task))).await,
        };

        let results: Vec<TaskResult> = tasks
            .iter()
            .zip(outcomes)
            .enumerate()
            .map(|(task_index, (task, outcome))| TaskResult {
                task_index,
                task: task.clone(),
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            })
            .collect();

        let successful = results.iter().filter(|r| r.success).count();
        BatchResult {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }

    /// Most recent records, oldest first; `limit` of 0 returns everything
    pub fn history(&self, limit: usize) -> Vec<ExecutionRecord> {
        let history = self.history_guard();
        let skip = match limit {
            0 => 0,
            n => history.len().saturating_sub(n),
        };
        history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history_guard().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear_history(&self) {
        self.history_guard().clear();
        info!("Execution history cleared");
    }

    pub fn stats(&self) -> DispatchStats {
        let history = self.history_guard();
        let total = history.len();
        let successful = history
            .iter()
            .filter(|r| r.status == ExecutionStatus::Success)
            .count();
        DispatchStats {
            total_executions: total,
            successful_executions: successful,
            failed_executions: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            connected: self.publisher.is_connected(),
        }
    }
}
