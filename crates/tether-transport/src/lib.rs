//! # Tether Transport
//!
//! Connection establishment over a short-range radio.
//!
//! Either device may dial the other, so every targeted connect runs two
//! roles at once: a listener waiting for an inbound link and an initiator
//! dialing out. The first link to appear wins and the other role is torn
//! down. A race without a target only listens, and re-arms forever.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_transport::{ConnectionService, RaceConfig, RaceOutcome};
//!
//! let service = ConnectionService::new(radio, RaceConfig::default());
//! let ticket = service.start_race(Some("AA:BB:CC:DD:EE:FF".into()));
//! match ticket.outcome().await {
//!     Some(RaceOutcome::Established { link, was_listener }) => { /* adopt link */ }
//!     Some(RaceOutcome::Failed(e)) => eprintln!("{e}"),
//!     _ => {}
//! }
//! ```

pub mod config;
pub mod error;
pub mod race;
pub mod service;

pub use config::RaceConfig;
pub use error::EstablishError;
pub use race::{EstablishmentAttempt, RaceOutcome, Role, run_race};
pub use service::{ConnectionService, RaceId, RaceTicket, Winner};
