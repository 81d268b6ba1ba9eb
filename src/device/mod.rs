use serde::{Deserialize, Serialize};
use std::fmt;


/// Final topic segment of device state messages
pub const STATE_SUFFIX: &str = "state";

/// Final topic segment of device commands. Device peers subscribe to
/// `<namespace>/+/+/set`.
pub const COMMAND_SUFFIX: &str = "set";

/// Location used when a device identifier has no `.` separator
pub const DEFAULT_LOCATION: &str = "default";

/// Device identifier in `type.location` form (e.g. "light.livingroom")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub device_type: String,
    pub location: String,
}

impl DeviceId {
    pub fn new(device_type: &str, location: &str) -> Self {
        Self {
            device_type: device_type.trim().to_lowercase(),
            location: location.trim().to_lowercase(),
        }
    }

    /// Parse a `type.location` identifier.
    ///
    /// Splits on the first `.`; without a separator the whole string is the
    /// device type and the location is [`DEFAULT_LOCATION`]. Both parts are
    /// lower-cased. Parsing never fails.
    ///
    /// ```
    /// use homeflux::device::DeviceId;
    ///
    /// let id = DeviceId::parse("Light.LivingRoom");
    /// assert_eq!(id.device_type, "light");
    /// assert_eq!(id.location, "livingroom");
    ///
    /// assert_eq!(DeviceId::parse("fan").location, "default");
    /// ```
    pub fn parse(device: &str) -> Self {
        match device.split_once('.') {
            Some((device_type, location)) => Self::new(device_type, location),
            None => Self::new(device, DEFAULT_LOCATION),
        }
    }

    /// Parse an identifier that must be exactly `type.location`.
    pub fn parse_strict(device: &str) -> Result<Self, DeviceIdError> {
        let parts: Vec<&str> = device.split('.').collect();
        match parts.as_slice() {
            [device_type, location] if !device_type.is_empty() && !location.is_empty() => {
                Ok(Self::new(device_type, location))
            }
            _ => Err(DeviceIdError::InvalidFormat(device.to_string())),
        }
    }

    /// State key this device reports under
    pub fn state_key(&self, namespace: &str) -> DeviceStateKey {
        DeviceStateKey::new(namespace, &self.device_type, &self.location)
    }

    /// Topic commands for this device are published to
    pub fn command_topic(&self, namespace: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            namespace.to_lowercase(),
            self.device_type,
            self.location,
            COMMAND_SUFFIX
        )
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device_type, self.location)
    }
}

/// Device identifier errors
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceIdError {
    /// Identifier is not in `type.location` form
    InvalidFormat(String),
}

impl fmt::Display for DeviceIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceIdError::InvalidFormat(id) => {
                write!(f, "device id '{}' must be in format 'type.name'", id)
            }
        }
    }
}

impl std::error::Error for DeviceIdError {}

/// Structured state key, canonically `<namespace>/<type>/<location>/state`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceStateKey {
    pub namespace: String,
    pub device_type: String,
    pub location: String,
}

impl DeviceStateKey {
    pub fn new(namespace: &str, device_type: &str, location: &str) -> Self {
        Self {
            namespace: namespace.to_lowercase(),
            device_type: device_type.to_lowercase(),
            location: location.to_lowercase(),
        }
    }

    /// Parse a state topic. Returns `None` for anything that is not exactly
    /// four non-empty segments ending in [`STATE_SUFFIX`].
    pub fn from_topic(topic: &str) -> Option<Self> {
        let normalized = normalize_key(topic);
        let parts: Vec<&str> = normalized.split('/').collect();
        match parts.as_slice() {
            [namespace, device_type, location, suffix]
                if *suffix == STATE_SUFFIX
                    && !namespace.is_empty()
                    && !device_type.is_empty()
                    && !location.is_empty() =>
            {
                Some(Self::new(namespace, device_type, location))
            }
            _ => None,
        }
    }

    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(&self.device_type, &self.location)
    }
}

impl fmt::Display for DeviceStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.namespace, self.device_type, self.location, STATE_SUFFIX
        )
    }
}

/// Wildcard subscription covering every device state topic in a namespace
pub fn state_topic_pattern(namespace: &str) -> String {
    format!("{}/+/+/{}", namespace.to_lowercase(), STATE_SUFFIX)
}

/// Case-normalise a raw topic into a store key
pub fn normalize_key(topic: &str) -> String {
    topic.trim().to_lowercase()
}
