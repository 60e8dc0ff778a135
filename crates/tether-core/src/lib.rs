//! # Tether Core
//!
//! Core types, traits, and errors shared by the Tether crates.
//!
//! Tether keeps one duplex byte-stream chat session alive between two
//! devices over a short-range radio link. This crate holds the pieces that
//! every layer agrees on:
//!
//! - [`PeerAddress`] / [`PeerInfo`]: who is on the other end
//! - [`Message`] / [`ConnectionState`]: what callers observe
//! - [`RadioAdapter`] / [`ListenHandle`] / [`Link`]: the consumed radio stack
//! - [`MessageStore`]: the consumed message persistence
//!
//! Two stores ship here ([`MemoryMessageStore`], [`FileMessageStore`]) along
//! with an in-memory radio ([`MockAir`], [`MockRadio`]) for tests and demos.

pub mod error;
pub mod file_store;
pub mod identity;
pub mod message;
pub mod mock_transport;
pub mod store;
pub mod transport;

pub use error::{StoreError, TransportError};
pub use file_store::FileMessageStore;
pub use identity::{PeerAddress, PeerInfo, UNKNOWN_DEVICE_NAME};
pub use message::{ConnectionState, LOCAL_SENDER, Message, REMOTE_FALLBACK_SENDER, SYSTEM_SENDER};
pub use mock_transport::{
    ConnectBehavior, ListenBehavior, MockAir, MockBehavior, MockRadio, MockStats, PHANTOM_ADDRESS,
};
pub use store::{MemoryMessageStore, MessageStore};
pub use transport::{Link, LinkIo, LinkReader, LinkWriter, ListenHandle, RadioAdapter, ServiceId};
