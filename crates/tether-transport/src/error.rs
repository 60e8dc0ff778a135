//! Establishment error types

use thiserror::Error;

use tether_core::TransportError;

/// Why a race ended without a link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstablishError {
    #[error("Radio adapter not available or disabled")]
    AdapterUnavailable,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Connection timeout after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Unable to establish connection in both server and client modes")]
    Exhausted,
}

impl EstablishError {
    /// True for failures the user has to fix (radio off, permission missing)
    pub fn needs_user_action(&self) -> bool {
        matches!(self, Self::AdapterUnavailable | Self::PermissionDenied(_))
    }
}

/// How a single role stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EndReason {
    /// The role was never launched (server-only races have no initiator)
    NotLaunched,
    /// Every attempt ran out without a link
    Exhausted,
    /// A non-retryable transport error
    Fatal(TransportError),
}

impl EndReason {
    fn rank(&self) -> u8 {
        match self {
            Self::NotLaunched => 0,
            Self::Exhausted => 1,
            Self::Fatal(TransportError::AdapterUnavailable) => 2,
            Self::Fatal(_) => 3,
        }
    }

    /// Race failure once both roles have stopped; the more serious reason wins
    pub(crate) fn combine(listener: &EndReason, initiator: &EndReason) -> EstablishError {
        let worst = if listener.rank() >= initiator.rank() {
            listener
        } else {
            initiator
        };
        match worst {
            Self::NotLaunched | Self::Exhausted => EstablishError::Exhausted,
            Self::Fatal(TransportError::PermissionDenied(why)) => {
                EstablishError::PermissionDenied(why.clone())
            }
            Self::Fatal(TransportError::AdapterUnavailable) => EstablishError::AdapterUnavailable,
            Self::Fatal(other) => EstablishError::PermissionDenied(other.to_string()),
        }
    }
}
