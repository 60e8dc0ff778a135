//! Peer addressing
//!
//! A [`PeerAddress`] is the stable, opaque identifier of a remote radio
//! endpoint (the string form of its hardware address). It keys message
//! history and is the target of connect/reconnect. [`PeerInfo`] pairs an
//! address with the human-readable name the radio reported, when it has one.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Name shown for a peer whose radio did not report one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Hardware address of a remote endpoint
///
/// Addresses are compared case-insensitively; the canonical form is
/// upper-case with surrounding whitespace removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Create an address, normalizing it to canonical form
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    /// Borrow the canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the address is empty after normalization
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A peer as reported by the radio: address plus optional display name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: PeerAddress,
    pub name: Option<String>,
}

impl PeerInfo {
    pub fn new(address: impl Into<PeerAddress>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name: name.filter(|n| !n.trim().is_empty()),
        }
    }

    /// Create a peer with a known display name
    pub fn named(address: impl Into<PeerAddress>, name: impl Into<String>) -> Self {
        Self::new(address, Some(name.into()))
    }

    /// Name for display, falling back to [`UNKNOWN_DEVICE_NAME`]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

impl Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.address)
    }
}
