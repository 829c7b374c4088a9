//! Error types for the swarm
//!
//! This module defines the error taxonomy shared by the tracker, the peer
//! node and the wire protocol.

use std::fmt;
use serde::{Serialize, Deserialize};

/// Result alias for operations that fail with a [`SwarmError`]
pub type SwarmResult<T> = std::result::Result<T, SwarmError>;

/// Comprehensive error type for swarm operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmError {
    /// Malformed request, out-of-range segment index, path traversal attempt
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Unknown peer, file or segment
    NotFoundError {
        message: String,
        resource: Option<String>,
    },

    /// A shape-class has more peers than available range length
    AllocationError {
        message: String,
        file: Option<String>,
    },

    /// Refused connection or timeout on a network call
    TransportError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Local segment store or state file errors
    StorageError {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Undecodable frame or unexpected reply
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },
}

/// Error category as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Allocation,
    Transport,
    Storage,
    Protocol,
    Config,
}

impl SwarmError {
    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        SwarmError::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        SwarmError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new NotFoundError
    pub fn not_found(message: impl Into<String>) -> Self {
        SwarmError::NotFoundError {
            message: message.into(),
            resource: None,
        }
    }

    /// Create a new NotFoundError naming the missing resource
    pub fn not_found_with_resource(message: impl Into<String>, resource: impl Into<String>) -> Self {
        SwarmError::NotFoundError {
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Create a new AllocationError
    pub fn allocation_error(message: impl Into<String>) -> Self {
        SwarmError::AllocationError {
            message: message.into(),
            file: None,
        }
    }

    /// Create a new AllocationError for a file
    pub fn allocation_error_with_file(message: impl Into<String>, file: impl Into<String>) -> Self {
        SwarmError::AllocationError {
            message: message.into(),
            file: Some(file.into()),
        }
    }

    /// Create a new TransportError
    pub fn transport_error(message: impl Into<String>) -> Self {
        SwarmError::TransportError {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new TransportError with address
    pub fn transport_error_with_address(message: impl Into<String>, address: impl Into<String>) -> Self {
        SwarmError::TransportError {
            message: message.into(),
            address: Some(address.into()),
            source: None,
        }
    }

    /// Create a new TransportError with address and source
    pub fn transport_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        SwarmError::TransportError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new StorageError
    pub fn storage_error(message: impl Into<String>) -> Self {
        SwarmError::StorageError {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new StorageError with path and source
    pub fn storage_error_full(message: impl Into<String>, path: impl Into<String>, source: impl Into<String>) -> Self {
        SwarmError::StorageError {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        SwarmError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        SwarmError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        SwarmError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            SwarmError::TransportError { source, .. }
            | SwarmError::StorageError { source, .. }
            | SwarmError::ProtocolError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            SwarmError::ValidationError { message, .. }
            | SwarmError::NotFoundError { message, .. }
            | SwarmError::AllocationError { message, .. }
            | SwarmError::ConfigError { message, .. } => {
                *message = format!("{} ({})", message, ctx);
            }
        }
        self
    }

    /// The wire category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwarmError::ValidationError { .. } => ErrorKind::Validation,
            SwarmError::NotFoundError { .. } => ErrorKind::NotFound,
            SwarmError::AllocationError { .. } => ErrorKind::Allocation,
            SwarmError::TransportError { .. } => ErrorKind::Transport,
            SwarmError::StorageError { .. } => ErrorKind::Storage,
            SwarmError::ProtocolError { .. } => ErrorKind::Protocol,
            SwarmError::ConfigError { .. } => ErrorKind::Config,
        }
    }

    /// The message without the category prefix, as sent on the wire
    pub fn message(&self) -> &str {
        match self {
            SwarmError::ValidationError { message, .. }
            | SwarmError::NotFoundError { message, .. }
            | SwarmError::AllocationError { message, .. }
            | SwarmError::TransportError { message, .. }
            | SwarmError::StorageError { message, .. }
            | SwarmError::ProtocolError { message, .. }
            | SwarmError::ConfigError { message, .. } => message,
        }
    }

    /// Rebuild an error received from a remote endpoint
    pub fn from_wire(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Validation => SwarmError::validation_error(message),
            ErrorKind::NotFound => SwarmError::not_found(message),
            ErrorKind::Allocation => SwarmError::allocation_error(message),
            ErrorKind::Transport => SwarmError::transport_error(message),
            ErrorKind::Storage => SwarmError::storage_error(message),
            ErrorKind::Protocol => SwarmError::protocol_error(message),
            ErrorKind::Config => SwarmError::ConfigError { message, field: None },
        }
    }

    /// Check if this is a NotFoundError
    pub fn is_not_found(&self) -> bool {
        matches!(self, SwarmError::NotFoundError { .. })
    }

    /// Check if this is a TransportError
    pub fn is_transport(&self) -> bool {
        matches!(self, SwarmError::TransportError { .. })
    }
}

impl fmt::Display for SwarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
            SwarmError::NotFoundError { message, resource } => {
                if let Some(r) = resource {
                    write!(f, "Not found: {} (resource: {})", message, r)
                } else {
                    write!(f, "Not found: {}", message)
                }
            }
            SwarmError::AllocationError { message, file } => {
                if let Some(file) = file {
                    write!(f, "Allocation error: {} (file: {})", message, file)
                } else {
                    write!(f, "Allocation error: {}", message)
                }
            }
            SwarmError::TransportError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Transport error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Transport error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Transport error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Transport error: {}", message),
                }
            }
            SwarmError::StorageError { message, path, source } => {
                match (path, source) {
                    (Some(p), Some(s)) => write!(f, "Storage error: {} (path: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Storage error: {} (path: {})", message, p),
                    (None, Some(s)) => write!(f, "Storage error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Storage error: {}", message),
                }
            }
            SwarmError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            SwarmError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for SwarmError {}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        SwarmError::storage_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::protocol_error_with_source("Failed to decode JSON document", err.to_string())
    }
}

impl From<std::net::AddrParseError> for SwarmError {
    fn from(err: std::net::AddrParseError) -> Self {
        SwarmError::transport_error_full("Failed to parse address", "unknown".to_string(), err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SwarmError {
    fn from(_err: tokio::time::error::Elapsed) -> Self {
        SwarmError::transport_error("Operation timed out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_with_field() {
        let err = SwarmError::validation_error_with_field("Segment index out of range", "segment_index");
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("segment_index"));
    }

    #[test]
    fn test_not_found_with_resource() {
        let err = SwarmError::not_found_with_resource("No eligible peers", "movie.mp4");
        assert_eq!(err.to_string(), "Not found: No eligible peers (resource: movie.mp4)");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_transport_error_full() {
        let err = SwarmError::transport_error_full("Connection refused", "127.0.0.1:6881", "os error 111");
        assert!(err.to_string().contains("127.0.0.1:6881"));
        assert!(err.to_string().contains("os error 111"));
        assert!(err.is_transport());
    }

    #[test]
    fn test_with_context() {
        let err = SwarmError::protocol_error("Bad frame").with_context("while reading reply");
        assert!(err.to_string().contains("while reading reply"));

        let err = SwarmError::not_found("Unknown peer").with_context("heartbeat");
        assert_eq!(err.to_string(), "Not found: Unknown peer (heartbeat)");
    }

    #[test]
    fn test_wire_round_trip_keeps_kind() {
        let original = SwarmError::allocation_error_with_file("Range too short", "a.bin");
        let rebuilt = SwarmError::from_wire(original.kind(), original.message());
        assert_eq!(rebuilt.kind(), ErrorKind::Allocation);
        assert_eq!(rebuilt.to_string(), "Allocation error: Range too short");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: SwarmError = io_err.into();
        assert!(matches!(err, SwarmError::StorageError { .. }));
    }

    #[test]
    fn test_from_addr_parse_error() {
        let addr_err = "invalid:address".parse::<std::net::SocketAddr>().unwrap_err();
        let err: SwarmError = addr_err.into();
        assert!(matches!(err, SwarmError::TransportError { .. }));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
