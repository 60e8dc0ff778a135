//! Error types for Tether

use thiserror::Error;

/// Errors surfaced by a radio adapter, a listen handle, or a link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Radio adapter not available or disabled")]
    AdapterUnavailable,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Stream closed")]
    StreamClosed,
}

impl TransportError {
    /// Errors that retrying cannot fix; the activity that hits one stops.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AdapterUnavailable | Self::PermissionDenied(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(e.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Errors from a message store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to acquire lock")]
    LockPoisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(TransportError::AdapterUnavailable.is_fatal());
        assert!(TransportError::PermissionDenied("no BLUETOOTH_CONNECT".into()).is_fatal());
        assert!(!TransportError::Timeout.is_fatal());
        assert!(!TransportError::Io("refused".into()).is_fatal());
        assert!(!TransportError::StreamClosed.is_fatal());
    }

    #[test]
    fn test_io_error_mapping() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            TransportError::from(denied),
            TransportError::PermissionDenied(_)
        ));

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(TransportError::from(timed_out), TransportError::Timeout);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(TransportError::from(reset), TransportError::Io(_)));
    }
}
