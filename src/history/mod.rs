use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Entries kept per user before the oldest is evicted
pub const DEFAULT_ENTRIES_PER_USER: usize = 100;

/// What a user interaction was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    GoalRequest,
    GoalExecution,
    PreferenceChange,
}

/// One recorded interaction
#[derive(Debug, Clone, Serialize)]
pub struct InteractionEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub data: Value,
}

/// Bounded per-user log of goal requests, their outcomes and preference changes.
pub struct InteractionHistory {
    users: DashMap<String, VecDeque<InteractionEntry>>,
    capacity: usize,
}

impl InteractionHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ENTRIES_PER_USER)
    }

    /// Capacity is clamped to at least 1
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            users: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the user's oldest when full
    pub fn record(&self, user_id: &str, kind: InteractionKind, data: Value) {
        let mut entries = self.users.entry(user_id.to_string()).or_default();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(InteractionEntry {
            timestamp: Utc::now(),
            kind,
            data,
        });
        debug!(user_id = %user_id, kind = ?kind, "Recorded interaction");
    }

    /// The user's most recent `limit` entries, oldest first; 0 returns all
    pub fn get(&self, user_id: &str, limit: usize) -> Vec<InteractionEntry> {
        let Some(entries) = self.users.get(user_id) else {
            return Vec::new();
        };
        let skip = if limit == 0 {
            0
        } else {
            entries.len().saturating_sub(limit)
        };
        entries.iter().skip(skip).cloned().collect()
    }

    /// Forget every entry for the user; false if there were none
    pub fn clear(&self, user_id: &str) -> bool {
        let removed = self.users.remove(user_id).is_some();
        info!(user_id = %user_id, "Cleared interaction history");
        removed
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Default for InteractionHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_and_get_in_order() {
        let history = InteractionHistory::new();
        history.record("john", InteractionKind::GoalRequest, json!({"goal": "movie"}));
        history.record("john", InteractionKind::GoalExecution, json!({"goal": "movie"}));
        history.record("jane", InteractionKind::GoalRequest, json!({"goal": "party"}));

        let entries = history.get("john", 0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, InteractionKind::GoalRequest);
        assert_eq!(entries[1].kind, InteractionKind::GoalExecution);
        assert_eq!(history.user_count(), 2);
    }

    #[test]
    fn test_limit_returns_most_recent() {
        let history = InteractionHistory::new();
        for i in 0..5 {
            history.record("john", InteractionKind::GoalRequest, json!({"n": i}));
        }

        let entries = history.get("john", 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].data["n"], 3);
        assert_eq!(entries[1].data["n"], 4);
        assert_eq!(history.get("john", 50).len(), 5);
    }

    #[test]
    fn test_oldest_entry_evicted_at_capacity() {
        let history = InteractionHistory::with_capacity(3);
        for i in 0..4 {
            history.record("john", InteractionKind::PreferenceChange, json!({"n": i}));
        }

        let entries = history.get("john", 0);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].data["n"], 1);
    }

    #[test]
    fn test_clear_only_affects_one_user() {
        let history = InteractionHistory::new();
        history.record("john", InteractionKind::GoalRequest, json!({}));
        history.record("jane", InteractionKind::GoalRequest, json!({}));

        assert!(history.clear("john"));
        assert!(!history.clear("john"));
        assert!(history.get("john", 0).is_empty());
        assert_eq!(history.get("jane", 0).len(), 1);
    }

    #[test]
    fn test_unknown_user_is_empty() {
        let history = InteractionHistory::new();
        assert!(history.get("nobody", 10).is_empty());
    }

    #[test]
    fn test_entry_serializes_type_tag() {
        let history = InteractionHistory::new();
        history.record("john", InteractionKind::GoalExecution, json!({"tasks_executed": 2}));

        let value = serde_json::to_value(&history.get("john", 0)[0]).unwrap();
        assert_eq!(value["type"], "goal_execution");
        assert_eq!(value["data"]["tasks_executed"], 2);
        assert!(value["timestamp"].is_string());
    }
}
