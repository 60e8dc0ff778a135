//! Radio transport abstraction
//!
//! The [`RadioAdapter`] trait is the seam between session logic and the
//! platform radio stack. It hands out two kinds of resources:
//!
//! - a [`ListenHandle`], a server-mode registration under a [`ServiceId`]
//!   that yields inbound [`Link`]s
//! - a [`Link`] opened outbound to a peer address
//!
//! A [`Link`] is an unframed, bidirectional byte stream. Bytes are passed
//! through verbatim; there is no message framing at this layer.
//!
//! Resources are closed by dropping them. Cancelling an in-flight
//! `accept` or `connect` future drops whatever it had opened.
//!
//! ## Implementations
//!
//! - [`MockRadio`](crate::mock_transport::MockRadio): in-memory radio for tests
//!   and demos (in this crate)

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::error::TransportError;
use crate::identity::{PeerAddress, PeerInfo};

/// Service record every Tether device listens under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceId {
    /// Human-readable service record name
    pub name: String,
    /// Service UUID, canonical hyphenated form
    pub uuid: String,
}

impl ServiceId {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into().to_ascii_uppercase(),
        }
    }
}

impl Default for ServiceId {
    /// Serial port profile record
    fn default() -> Self {
        Self::new("BluetoothChat", "00001101-0000-1000-8000-00805F9B34FB")
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.uuid)
    }
}

/// Any duplex byte pipe a link can be built on
pub trait LinkIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> LinkIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Read side of a split [`Link`]
pub type LinkReader = ReadHalf<Box<dyn LinkIo>>;
/// Write side of a split [`Link`]
pub type LinkWriter = WriteHalf<Box<dyn LinkIo>>;

/// An established byte stream to a remote peer
pub struct Link {
    remote: PeerInfo,
    io: Box<dyn LinkIo>,
}

impl Link {
    pub fn new(remote: PeerInfo, io: impl LinkIo + 'static) -> Self {
        Self {
            remote,
            io: Box::new(io),
        }
    }

    /// The peer on the other end
    pub fn remote(&self) -> &PeerInfo {
        &self.remote
    }

    /// Split into independently owned read and write halves.
    ///
    /// The underlying pipe closes once both halves are dropped.
    pub fn into_split(self) -> (PeerInfo, LinkReader, LinkWriter) {
        let (reader, writer) = tokio::io::split(self.io);
        (self.remote, reader, writer)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").field("remote", &self.remote).finish_non_exhaustive()
    }
}

/// Server-mode registration under a service record
///
/// Dropping the handle closes it and unregisters the service.
#[async_trait]
pub trait ListenHandle: Send {
    /// Wait for the next inbound connection.
    ///
    /// Has no timeout of its own; callers bound it.
    async fn accept(&mut self) -> Result<Link, TransportError>;
}

/// Platform radio adapter
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Whether this device has a radio at all
    fn is_supported(&self) -> bool;

    /// Whether the radio is switched on
    fn is_enabled(&self) -> bool;

    /// Peers this device is bonded (paired) with
    fn bonded_peers(&self) -> Vec<PeerInfo>;

    /// Begin scanning for nearby peers
    async fn start_discovery(&self) -> Result<(), TransportError>;

    /// Stop an in-progress scan. No-op when not scanning.
    async fn cancel_discovery(&self);

    /// Whether a scan is in progress
    fn is_discovering(&self) -> bool;

    /// Open a server-mode registration under `service`
    ///
    /// # Errors
    ///
    /// `AdapterUnavailable` when the radio is off, `PermissionDenied` when the
    /// platform refuses the registration.
    async fn listen(&self, service: &ServiceId) -> Result<Box<dyn ListenHandle>, TransportError>;

    /// Open an outbound link to `peer` under `service`
    ///
    /// Has no timeout of its own; callers bound it.
    async fn connect(&self, peer: &PeerAddress, service: &ServiceId)
    -> Result<Link, TransportError>;

    /// Ask the platform to bond with `peer`
    ///
    /// Default implementation reports the capability as unsupported.
    async fn request_pairing(&self, peer: &PeerAddress) -> Result<(), TransportError> {
        Err(TransportError::Unsupported(format!(
            "pairing with {} not supported by this adapter",
            peer
        )))
    }
}
