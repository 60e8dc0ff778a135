//! Chat messages and the session-level connection state

use std::fmt::{self, Display};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::identity::{PeerAddress, PeerInfo};

/// Sender label for messages written by this device
pub const LOCAL_SENDER: &str = "You";
/// Sender label for session notices ("Connected to ...", "Disconnected")
pub const SYSTEM_SENDER: &str = "System";
/// Sender label for inbound messages from a peer that reported no name
pub const REMOTE_FALLBACK_SENDER: &str = "Friend";

/// State of the single logical session exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote it ("You", "System", or the peer's name)
    pub sender: String,
    /// Message body
    pub text: String,
    /// Display name of the peer this message belongs to
    pub peer_name: Option<String>,
    /// Address of the peer this message belongs to; the persistence key
    pub peer_address: Option<PeerAddress>,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp_millis: i64,
    /// True when written on this device
    pub is_local: bool,
}

impl Message {
    fn stamped(
        sender: impl Into<String>,
        text: impl Into<String>,
        peer: Option<&PeerInfo>,
        is_local: bool,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            peer_name: peer.and_then(|p| p.name.clone()),
            peer_address: peer.map(|p| p.address.clone()),
            timestamp_millis: Utc::now().timestamp_millis(),
            is_local,
        }
    }

    /// A message typed on this device and sent to `peer`
    pub fn local(sender: impl Into<String>, text: impl Into<String>, peer: Option<&PeerInfo>) -> Self {
        Self::stamped(sender, text, peer, true)
    }

    /// A message read off the link from `peer`
    pub fn remote(text: impl Into<String>, peer: &PeerInfo) -> Self {
        let sender = peer
            .name
            .clone()
            .unwrap_or_else(|| REMOTE_FALLBACK_SENDER.to_string());
        Self::stamped(sender, text, Some(peer), false)
    }

    /// A session notice attributed to `peer` when there is one
    pub fn system(text: impl Into<String>, peer: Option<&PeerInfo>) -> Self {
        Self::stamped(SYSTEM_SENDER, text, peer, false)
    }

    /// Override the timestamp (history imports, tests)
    pub fn at(mut self, timestamp_millis: i64) -> Self {
        self.timestamp_millis = timestamp_millis;
        self
    }

    /// True for session notices
    pub fn is_system(&self) -> bool {
        !self.is_local && self.sender == SYSTEM_SENDER
    }

    /// True if this message belongs to the history of `peer`
    pub fn belongs_to(&self, peer: &PeerAddress) -> bool {
        self.peer_address.as_ref() == Some(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_sender_falls_back_to_friend() {
        let anonymous = PeerInfo::new("AA:AA:AA:AA:AA:AA", None);
        let msg = Message::remote("hi", &anonymous);
        assert_eq!(msg.sender, REMOTE_FALLBACK_SENDER);
        assert!(!msg.is_local);
        assert!(!msg.is_system());
        assert!(msg.belongs_to(&anonymous.address));
    }

    #[test]
    fn test_system_message_attribution() {
        let peer = PeerInfo::named("AA:AA:AA:AA:AA:AA", "Tablet");
        let msg = Message::system("Connected to Tablet", Some(&peer));
        assert!(msg.is_system());
        assert_eq!(msg.peer_name.as_deref(), Some("Tablet"));

        let detached = Message::system("Disconnected", None);
        assert!(detached.peer_address.is_none());
    }

    #[test]
    fn test_local_message_and_timestamp_override() {
        let peer = PeerInfo::named("AA:AA:AA:AA:AA:AA", "Tablet");
        let msg = Message::local(LOCAL_SENDER, "hello", Some(&peer)).at(42);
        assert!(msg.is_local);
        assert_eq!(msg.timestamp_millis, 42);
        assert_eq!(msg.sender, "You");
    }

    #[test]
    fn test_state_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
