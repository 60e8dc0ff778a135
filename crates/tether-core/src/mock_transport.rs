//! In-memory radio for testing
//!
//! A [`MockAir`] is a shared medium that any number of [`MockRadio`]s attach
//! to. A radio that listens registers its service record on the air; another
//! radio dialing that address is paired with it through an in-memory duplex
//! pipe. Behaviour can be scripted per radio (switched off, permission
//! denial, hanging connects, instant phantom links) and every radio counts
//! what was done to it, so tests can assert on retries and on resources
//! being closed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tether_core::{MockAir, PeerInfo, RadioAdapter, ServiceId};
//!
//! let air = MockAir::new();
//! let alice = air.radio(PeerInfo::named("AA:AA:AA:AA:AA:AA", "Alice"));
//! let bob = air.radio(PeerInfo::named("BB:BB:BB:BB:BB:BB", "Bob"));
//!
//! let service = ServiceId::default();
//! let mut handle = alice.listen(&service).await?;
//! let outbound = bob.connect(&"AA:AA:AA:AA:AA:AA".into(), &service).await?;
//! let inbound = handle.accept().await?;
//! assert_eq!(inbound.remote().address, bob.local().address);
//! ```

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::identity::{PeerAddress, PeerInfo};
use crate::transport::{Link, ListenHandle, RadioAdapter, ServiceId};

/// Buffer size of each in-memory pipe direction
const PIPE_CAPACITY: usize = 64 * 1024;

/// Address reported for the far end of phantom links
pub const PHANTOM_ADDRESS: &str = "00:00:00:00:00:00";

/// How `listen`/`accept` behave on a [`MockRadio`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenBehavior {
    /// Register on the air and accept real dials
    #[default]
    Normal,
    /// `listen` fails with `PermissionDenied`
    Deny,
    /// `listen` fails with a benign IO error
    Fail,
    /// `accept` completes immediately with a phantom link
    Instant,
}

/// How `connect` behaves on a [`MockRadio`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    /// Dial through the air
    #[default]
    Normal,
    /// Fails with `PermissionDenied`
    Deny,
    /// Fails with a benign IO error
    Fail,
    /// Never completes
    Hang,
    /// Completes immediately with a phantom link
    Instant,
}

/// Scripted behaviour of one radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBehavior {
    pub supported: bool,
    pub enabled: bool,
    pub listen: ListenBehavior,
    pub connect: ConnectBehavior,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            supported: true,
            enabled: true,
            listen: ListenBehavior::Normal,
            connect: ConnectBehavior::Normal,
        }
    }
}

/// Counters of what was done to one radio
#[derive(Debug, Default)]
pub struct MockStats {
    pub listen_calls: AtomicUsize,
    pub listen_handles_opened: AtomicUsize,
    pub listen_handles_closed: AtomicUsize,
    pub accept_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub pending_connects: AtomicUsize,
    pub discovery_cancels: AtomicUsize,
    pub links_opened: AtomicUsize,
    pub links_closed: AtomicUsize,
}

impl MockStats {
    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    pub fn listen_handles_closed(&self) -> usize {
        self.listen_handles_closed.load(Ordering::SeqCst)
    }

    /// Listen handles handed out and not yet dropped
    pub fn open_listen_handles(&self) -> usize {
        self.listen_handles_opened
            .load(Ordering::SeqCst)
            .saturating_sub(self.listen_handles_closed())
    }

    pub fn accept_calls(&self) -> usize {
        self.accept_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Hanging connects whose future has not been dropped yet
    pub fn pending_connects(&self) -> usize {
        self.pending_connects.load(Ordering::SeqCst)
    }

    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }

    pub fn links_opened(&self) -> usize {
        self.links_opened.load(Ordering::SeqCst)
    }

    /// Links on this radio's side that are still open
    pub fn live_links(&self) -> usize {
        self.links_opened()
            .saturating_sub(self.links_closed.load(Ordering::SeqCst))
    }
}

/// Pipe end that reports its own closing to the owning radio's stats
struct TrackedIo {
    inner: DuplexStream,
    stats: Arc<MockStats>,
}

impl TrackedIo {
    fn new(inner: DuplexStream, stats: Arc<MockStats>) -> Self {
        stats.links_opened.fetch_add(1, Ordering::SeqCst);
        Self { inner, stats }
    }
}

impl Drop for TrackedIo {
    fn drop(&mut self) {
        self.stats.links_closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Counts a hanging connect until its future is dropped
struct PendingConnect(Arc<MockStats>);

impl PendingConnect {
    fn new(stats: &Arc<MockStats>) -> Self {
        stats.pending_connects.fetch_add(1, Ordering::SeqCst);
        Self(stats.clone())
    }
}

impl Drop for PendingConnect {
    fn drop(&mut self) {
        self.0.pending_connects.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Registration {
    id: u64,
    inbox: mpsc::Sender<Link>,
}

type ListenerKey = (PeerAddress, String);

/// Shared medium connecting mock radios
#[derive(Default)]
pub struct MockAir {
    devices: DashMap<PeerAddress, (PeerInfo, Arc<MockStats>)>,
    listeners: DashMap<ListenerKey, Registration>,
    next_registration: AtomicU64,
}

impl MockAir {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new radio with identity `local` to this air
    pub fn radio(self: &Arc<Self>, local: PeerInfo) -> Arc<MockRadio> {
        let stats = Arc::new(MockStats::default());
        self.devices
            .insert(local.address.clone(), (local.clone(), stats.clone()));
        Arc::new(MockRadio {
            air: self.clone(),
            local,
            behavior: Mutex::new(MockBehavior::default()),
            discovering: AtomicBool::new(false),
            bonded: Mutex::new(Vec::new()),
            phantoms: Arc::new(Mutex::new(Vec::new())),
            stats,
        })
    }

    /// Whether `address` currently has a service registered under `service`
    pub fn is_listening(&self, address: &PeerAddress, service: &ServiceId) -> bool {
        self.listeners
            .contains_key(&(address.clone(), service.uuid.clone()))
    }

    fn register(&self, address: &PeerAddress, service: &ServiceId) -> (ListenerKey, u64, mpsc::Receiver<Link>) {
        let id = self.next_registration.fetch_add(1, Ordering::SeqCst);
        let (inbox, rx) = mpsc::channel(1);
        let key = (address.clone(), service.uuid.clone());
        self.listeners.insert(key.clone(), Registration { id, inbox });
        (key, id, rx)
    }

    fn unregister(&self, key: &ListenerKey, id: u64) {
        self.listeners.remove_if(key, |_, reg| reg.id == id);
    }

    fn dial(
        &self,
        from: &PeerInfo,
        from_stats: &Arc<MockStats>,
        to: &PeerAddress,
        service: &ServiceId,
    ) -> Result<Link, TransportError> {
        let refused = || TransportError::Io(format!("connection refused by {}", to));

        let (target, target_stats) = self
            .devices
            .get(to)
            .map(|d| d.value().clone())
            .ok_or_else(|| TransportError::Io(format!("{} is out of range", to)))?;

        let inbox = self
            .listeners
            .get(&(to.clone(), service.uuid.clone()))
            .map(|reg| reg.inbox.clone())
            .ok_or_else(refused)?;

        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        let inbound = Link::new(from.clone(), TrackedIo::new(far, target_stats));
        inbox.try_send(inbound).map_err(|_| refused())?;

        debug!(from = %from.address, to = %to, "Mock air paired link");
        Ok(Link::new(target, TrackedIo::new(near, from_stats.clone())))
    }
}

/// In-memory radio attached to a [`MockAir`]
pub struct MockRadio {
    air: Arc<MockAir>,
    local: PeerInfo,
    behavior: Mutex<MockBehavior>,
    discovering: AtomicBool,
    bonded: Mutex<Vec<PeerInfo>>,
    phantoms: Arc<Mutex<Vec<DuplexStream>>>,
    stats: Arc<MockStats>,
}

impl MockRadio {
    /// This radio's own identity
    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    pub fn behavior(&self) -> MockBehavior {
        self.behavior.lock().map(|b| *b).unwrap_or_default()
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        if let Ok(mut b) = self.behavior.lock() {
            *b = behavior;
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.set_behavior(MockBehavior {
            enabled,
            ..self.behavior()
        });
    }

    pub fn set_listen_behavior(&self, listen: ListenBehavior) {
        self.set_behavior(MockBehavior {
            listen,
            ..self.behavior()
        });
    }

    pub fn set_connect_behavior(&self, connect: ConnectBehavior) {
        self.set_behavior(MockBehavior {
            connect,
            ..self.behavior()
        });
    }

    /// Record `peer` as bonded without going through pairing
    pub fn add_bonded(&self, peer: PeerInfo) {
        if let Ok(mut bonded) = self.bonded.lock()
            && !bonded.iter().any(|p| p.address == peer.address)
        {
            bonded.push(peer);
        }
    }

    fn available(&self) -> bool {
        let b = self.behavior();
        b.supported && b.enabled
    }
}

fn phantom_link(phantoms: &Mutex<Vec<DuplexStream>>, stats: &Arc<MockStats>) -> Link {
    let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
    if let Ok(mut held) = phantoms.lock() {
        held.push(far);
    }
    Link::new(
        PeerInfo::named(PHANTOM_ADDRESS, "Phantom"),
        TrackedIo::new(near, stats.clone()),
    )
}

struct MockListenHandle {
    air: Arc<MockAir>,
    key: ListenerKey,
    id: u64,
    inbox: mpsc::Receiver<Link>,
    instant: bool,
    phantoms: Arc<Mutex<Vec<DuplexStream>>>,
    stats: Arc<MockStats>,
}

#[async_trait]
impl ListenHandle for MockListenHandle {
    async fn accept(&mut self) -> Result<Link, TransportError> {
        self.stats.accept_calls.fetch_add(1, Ordering::SeqCst);
        if self.instant {
            return Ok(phantom_link(&self.phantoms, &self.stats));
        }
        self.inbox.recv().await.ok_or(TransportError::StreamClosed)
    }
}

impl Drop for MockListenHandle {
    fn drop(&mut self) {
        self.air.unregister(&self.key, self.id);
        self.stats
            .listen_handles_closed
            .fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RadioAdapter for MockRadio {
    fn is_supported(&self) -> bool {
        self.behavior().supported
    }

    fn is_enabled(&self) -> bool {
        self.behavior().enabled
    }

    fn bonded_peers(&self) -> Vec<PeerInfo> {
        self.bonded.lock().map(|b| b.clone()).unwrap_or_default()
    }

    async fn start_discovery(&self) -> Result<(), TransportError> {
        if !self.available() {
            return Err(TransportError::AdapterUnavailable);
        }
        self.discovering.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_discovery(&self) {
        if self.discovering.swap(false, Ordering::SeqCst) {
            self.stats.discovery_cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    async fn listen(&self, service: &ServiceId) -> Result<Box<dyn ListenHandle>, TransportError> {
        if !self.available() {
            return Err(TransportError::AdapterUnavailable);
        }
        self.stats.listen_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior();
        match behavior.listen {
            ListenBehavior::Deny => {
                return Err(TransportError::PermissionDenied(
                    "listen refused by platform".to_string(),
                ));
            }
            ListenBehavior::Fail => {
                return Err(TransportError::Io("service record busy".to_string()));
            }
            ListenBehavior::Normal | ListenBehavior::Instant => {}
        }

        self.stats
            .listen_handles_opened
            .fetch_add(1, Ordering::SeqCst);
        let (key, id, inbox) = self.air.register(&self.local.address, service);
        Ok(Box::new(MockListenHandle {
            air: self.air.clone(),
            key,
            id,
            inbox,
            instant: behavior.listen == ListenBehavior::Instant,
            phantoms: self.phantoms.clone(),
            stats: self.stats.clone(),
        }))
    }

    async fn connect(
        &self,
        peer: &PeerAddress,
        service: &ServiceId,
    ) -> Result<Link, TransportError> {
        if !self.available() {
            return Err(TransportError::AdapterUnavailable);
        }
        self.stats.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior().connect {
            ConnectBehavior::Normal => self.air.dial(&self.local, &self.stats, peer, service),
            ConnectBehavior::Deny => Err(TransportError::PermissionDenied(
                "connect refused by platform".to_string(),
            )),
            ConnectBehavior::Fail => Err(TransportError::Io(format!(
                "read failed, socket might closed or timeout ({})",
                peer
            ))),
            ConnectBehavior::Hang => {
                let _pending = PendingConnect::new(&self.stats);
                std::future::pending().await
            }
            ConnectBehavior::Instant => Ok(phantom_link(&self.phantoms, &self.stats)),
        }
    }

    async fn request_pairing(&self, peer: &PeerAddress) -> Result<(), TransportError> {
        if !self.available() {
            return Err(TransportError::AdapterUnavailable);
        }
        let info = self
            .air
            .devices
            .get(peer)
            .map(|d| d.value().0.clone())
            .ok_or_else(|| TransportError::Io(format!("pairing failed: {} not in range", peer)))?;
        self.add_bonded(info);
        Ok(())
    }
}
