//! # Tether Session
//!
//! The session layer: one chat session at a time over a radio link.
//!
//! [`SessionRepository`] owns the session. It drives establishment races
//! through a [`ConnectionService`](tether_transport::ConnectionService),
//! adopts the winning link, reads messages off it, and writes messages to
//! it. When the link drops or a connect fails it can reconnect on its own,
//! and a background supervisor keeps a listener up while idle so the peer
//! can always reach this device.
//!
//! ## State machine
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──won──▶ Connected
//!      ▲                        │                   │
//!      │                      failed          lost / disconnect
//!      │                        ▼                   │
//!      └──────reconnect───── Error ◀──read error────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_core::ConnectionState;
//! use tether_session::{SessionConfig, SessionRepository};
//!
//! let session = SessionRepository::new(radio, store, SessionConfig::default());
//! session.start_supervisor();
//! session.connect("AA:BB:CC:DD:EE:FF".into()).await;
//!
//! let mut state = session.subscribe_state();
//! state.wait_for(|s| *s == ConnectionState::Connected).await?;
//! session.send_message("hello").await;
//! ```

pub mod config;
pub mod error;
pub mod history;
mod read_loop;
pub mod repository;
mod state;
mod supervisor;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use history::Conversation;
pub use repository::SessionRepository;
pub use state::AutoReconnectPolicy;
