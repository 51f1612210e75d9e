//! Error types for the botlink-connector crate.
//!
//! One error enum covers every failure a caller of `Connector::call` can see,
//! from remote status codes to dropped transports.

use botlink_types::UnknownKind;

use crate::protocol;

/// Unified error type for connector operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The gateway answered with a non-zero status code
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The gateway rejected the session key
    #[error("Invalid session ({code}): {message}")]
    SessionInvalid { code: i64, message: String },

    #[error("Transport closed")]
    TransportClosed,

    #[error("Capability unsupported: {0}")]
    CapabilityUnsupported(String),

    #[error("Call timeout")]
    Timeout,

    #[error("Invalid call parameters: {0}")]
    InvalidParams(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown connector kind: {0}")]
    UnknownConnectorKind(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ConnectorError {
    /// Map a gateway status code to its error.
    ///
    /// An empty `message` is replaced by the description of the code.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = protocol::describe_code(code).to_string();
        }
        match code {
            protocol::INVALID_SESSION | protocol::UNVERIFIED_SESSION => {
                Self::SessionInvalid { code, message }
            }
            _ => Self::Remote { code, message },
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::CapabilityUnsupported(message.into())
    }

    #[must_use]
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid { .. })
    }

    /// Status code carried by remote failures.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Remote { code, .. } | Self::SessionInvalid { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

impl From<UnknownKind> for ConnectorError {
    fn from(e: UnknownKind) -> Self {
        Self::UnknownConnectorKind(e.0)
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_invalid_session() {
        let err = ConnectorError::from_code(protocol::INVALID_SESSION, "expired");
        assert!(err.is_session_invalid());
        assert_eq!(err.code(), Some(3));
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_from_code_unverified_session_is_session_error() {
        let err = ConnectorError::from_code(protocol::UNVERIFIED_SESSION, "");
        assert!(err.is_session_invalid());
    }

    #[test]
    fn test_from_code_remote_fills_empty_message() {
        let err = ConnectorError::from_code(protocol::NO_PERMISSION, "");
        match err {
            ConnectorError::Remote { code, message } => {
                assert_eq!(code, 10);
                assert_eq!(message, "No permission");
            }
            _ => panic!("Expected Remote error"),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ConnectorError::TransportClosed.to_string(), "Transport closed");
        assert_eq!(ConnectorError::Timeout.to_string(), "Call timeout");

        let err = ConnectorError::unsupported("multipart over websocket");
        assert_eq!(
            err.to_string(),
            "Capability unsupported: multipart over websocket"
        );
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_error_from_unknown_kind() {
        let err: ConnectorError = UnknownKind("pigeon".to_string()).into();
        assert!(matches!(err, ConnectorError::UnknownConnectorKind(ref k) if k == "pigeon"));
    }

    #[test]
    fn test_error_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("}{").unwrap_err();
        let err: ConnectorError = json_err.into();
        assert!(matches!(err, ConnectorError::Json(_)));
    }

    #[test]
    fn test_error_from_websocket_error() {
        let err: ConnectorError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, ConnectorError::WebSocket(_)));
        assert!(err.to_string().contains("WebSocket error"));
    }
}
