//! Error types for the session layer

use thiserror::Error;

use tether_core::StoreError;

/// Errors from session operations
///
/// The `Display` text is what gets published on the error channel.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot send message: not connected")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    Write(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_text() {
        assert_eq!(
            SessionError::NotConnected.to_string(),
            "Cannot send message: not connected"
        );
        assert_eq!(
            SessionError::Write("output stream not available".into()).to_string(),
            "Failed to send message: output stream not available"
        );
    }
}
