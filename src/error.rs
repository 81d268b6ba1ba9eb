use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stable error tags handed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Payload could not be decoded as JSON
    DecodeError,
    /// Connect, subscribe or publish failed
    TransportError,
    /// Anything the transport did not classify
    UnexpectedError,
    /// Task failed validation before touching the bus
    ValidationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::UnexpectedError => "unexpected_error",
            ErrorKind::ValidationError => "validation_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures reported by a bus transport.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BusError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected bus error: {0}")]
    Unexpected(String),
}

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::Transport(_) => ErrorKind::TransportError,
            BusError::Unexpected(_) => ErrorKind::UnexpectedError,
        }
    }
}

/// A state message whose payload is not valid JSON.
#[derive(Debug, Error)]
#[error("failed to decode payload on '{topic}': {source}")]
pub struct DecodeError {
    pub topic: String,
    #[source]
    pub source: serde_json::Error,
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DecodeError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_kinds() {
        assert_eq!(
            BusError::Transport("refused".into()).kind(),
            ErrorKind::TransportError
        );
        assert_eq!(
            BusError::Unexpected("closed".into()).kind(),
            ErrorKind::UnexpectedError
        );
    }

    #[test]
    fn test_error_kind_tags() {
        assert_eq!(ErrorKind::DecodeError.to_string(), "decode_error");
        assert_eq!(
            serde_json::to_value(ErrorKind::ValidationError).unwrap(),
            serde_json::json!("validation_error")
        );
    }
}
