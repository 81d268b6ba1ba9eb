use dashmap::DashMap;
use serde_json::{Number, Value};
use std::collections::HashMap;
use tracing::debug;

/// Preference key -> value for one user
pub type Preferences = HashMap<String, Value>;

/// Read-only view of per-user preferences consumed by the Planner.
pub trait PreferenceSource: Send + Sync {
    /// Preferences for `user_id`; empty when the user is unknown
    fn get_preferences(&self, user_id: &str) -> Preferences;
}

/// In-process preference store
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    users: DashMap<String, Preferences>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an already-typed value
    pub fn set(&self, user_id: &str, key: &str, value: Value) {
        debug!(user_id = %user_id, key = %key, "Setting preference");
        self.users
            .entry(user_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    /// Store a raw string value, coerced with [`coerce_value`]. Returns the
    /// stored value.
    pub fn set_preference(&self, user_id: &str, key: &str, raw: &str) -> Value {
        let value = coerce_value(raw);
        self.set(user_id, key, value.clone());
        value
    }

    pub fn remove(&self, user_id: &str, key: &str) -> Option<Value> {
        self.users
            .get_mut(user_id)
            .and_then(|mut prefs| prefs.remove(key))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl PreferenceSource for InMemoryPreferences {
    fn get_preferences(&self, user_id: &str) -> Preferences {
        self.users
            .get(user_id)
            .map(|prefs| prefs.clone())
            .unwrap_or_default()
    }
}

/// Interpret a raw query-string value.
///
/// A value containing `.` that parses as a float becomes a float, an integer
/// literal becomes an integer, `true`/`false` in any case become booleans, and
/// everything else stays a string.
pub fn coerce_value(raw: &str) -> Value {
    if raw.contains('.') {
        if let Some(number) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(number);
        }
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    match raw.to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
