use crate::device::normalize_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Last-known payload for one state key
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Payload exactly as decoded from the bus (opaque to the store)
    pub payload: Value,

    /// When the store last replaced this payload
    pub last_updated: DateTime<Utc>,
}

/// Point-in-time copy of the whole store
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub entries: BTreeMap<String, Value>,
    /// RFC 3339 update time per key
    pub timestamps: BTreeMap<String, String>,
    pub count: usize,
}

impl StateSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&normalize_key(key))
    }
}

/// StateStore holds the latest payload for every observed device state key.
///
/// All access goes through one store-wide lock: payloads are replaced whole,
/// never merged, so a reader sees either the previous or the next payload of
/// a key and `dump` copies every entry under the same read guard.
#[derive(Debug, Default)]
pub struct StateStore {
    states: RwLock<HashMap<String, DeviceState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the payload stored for `key` and stamp it with the current time
    pub fn update(&self, key: &str, payload: Value) -> DeviceState {
        let key = normalize_key(key);
        let state = DeviceState {
            payload,
            last_updated: Utc::now(),
        };

        self.write().insert(key.clone(), state.clone());
        debug!(key = %key, "State updated");

        state
    }

    /// Payload of the most recent completed update for `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read()
            .get(&normalize_key(key))
            .map(|state| state.payload.clone())
    }

    /// Payload plus update time for `key`
    pub fn get_state(&self, key: &str) -> Option<DeviceState> {
        self.read().get(&normalize_key(key)).cloned()
    }

    pub fn last_updated(&self, key: &str) -> Option<DateTime<Utc>> {
        self.read()
            .get(&normalize_key(key))
            .map(|state| state.last_updated)
    }

    /// Consistent snapshot of every entry
    pub fn dump(&self) -> StateSnapshot {
        let states = self.read();

        let mut snapshot = StateSnapshot {
            count: states.len(),
            ..Default::default()
        };
        for (key, state) in states.iter() {
            snapshot.entries.insert(key.clone(), state.payload.clone());
            snapshot
                .timestamps
                .insert(key.clone(), state.last_updated.to_rfc3339());
        }

        snapshot
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.read().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(&normalize_key(key))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every entry (test and reset paths only)
    pub fn clear(&self) {
        let removed = {
            let mut states = self.write();
            let removed = states.len();
            states.clear();
            removed
        };
        info!(removed = removed, "State store cleared");
    }
}
