// Error taxonomy shared by the pipeline
pub mod error;

// Device identifiers and topic layout
pub mod device;

// Device command requests
pub mod task;

// Live device state
pub mod state;

// Observer lists with panic isolation
pub mod observer;

// Message bus transports, ingestion and command publishing
pub mod bus;

// User preferences
pub mod preferences;

// Goal planning
pub mod planner;

// Redundancy filtering and prioritisation
pub mod scheduler;

// Command execution and history
pub mod dispatcher;

// Per-user interaction log
pub mod history;

// Process-lifetime context wiring the pipeline together
pub mod hub;

// Configuration loading
pub mod config;

// HTTP API
pub mod api;

pub use hub::Hub;
pub use task::{ScheduledTask, Task};
