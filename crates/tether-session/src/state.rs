//! Session state and its transitions
//!
//! Every move into or out of `Connected` happens with the core lock held, so
//! adopting a link, disconnecting, and reacting to a dead link are
//! serialized against each other. Observers read the published copies in
//! the watch channels and never touch the core.
//!
//! Writes are the exception: they run outside the core lock on a writer of
//! their own, and give up as soon as the link they started on is dropped.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Instrument, Span, debug, info, warn};

use tether_core::{
    ConnectionState, Link, LinkWriter, Message, MessageStore, PeerAddress, PeerInfo,
    TransportError,
};
use tether_transport::{ConnectionService, EstablishError, RaceId, RaceOutcome, RaceTicket};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::read_loop;

/// Whether to reconnect on its own, and to whom
///
/// `last_peer` is set by `connect` only; links adopted without a `connect`
/// leave it alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoReconnectPolicy {
    pub enabled: bool,
    pub last_peer: Option<PeerAddress>,
}

/// The one mutable session record
#[derive(Default)]
pub(crate) struct SessionCore {
    pub(crate) state: ConnectionState,
    pub(crate) peer: Option<PeerInfo>,
    /// Present exactly while `state` is `Connected`
    writer: Option<Arc<Mutex<LinkWriter>>>,
    read_task: Option<JoinHandle<()>>,
    /// Bumped whenever a link is adopted or dropped; read loops of older
    /// links compare against it and stand down
    epoch: u64,
    pub(crate) policy: AutoReconnectPolicy,
    reconnect: Option<JoinHandle<()>>,
    /// Race started by the last `connect`, until it settles
    foreground: Option<RaceId>,
}

pub(crate) struct SessionInner {
    pub(crate) config: SessionConfig,
    pub(crate) service: ConnectionService,
    pub(crate) store: Arc<dyn MessageStore>,
    pub(crate) core: Mutex<SessionCore>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) messages_tx: watch::Sender<Vec<Message>>,
    pub(crate) error_tx: watch::Sender<Option<String>>,
    pub(crate) peer_tx: watch::Sender<Option<PeerInfo>>,
    pub(crate) current_peer_tx: watch::Sender<Option<PeerAddress>>,
    pub(crate) auto_reconnect_tx: watch::Sender<bool>,
    /// Mirror of `SessionCore::epoch` for writes in flight
    epoch_tx: watch::Sender<u64>,
    /// Set when a background race fails; lengthens the next supervisor pause
    pub(crate) background_faulted: AtomicBool,
    pub(crate) supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    pub(crate) fn new(
        service: ConnectionService,
        store: Arc<dyn MessageStore>,
        config: SessionConfig,
    ) -> Self {
        let core = SessionCore {
            policy: AutoReconnectPolicy {
                enabled: config.auto_reconnect,
                last_peer: None,
            },
            ..Default::default()
        };
        Self {
            service,
            store,
            core: Mutex::new(core),
            state_tx: watch::Sender::new(ConnectionState::Disconnected),
            messages_tx: watch::Sender::new(Vec::new()),
            error_tx: watch::Sender::new(None),
            peer_tx: watch::Sender::new(None),
            current_peer_tx: watch::Sender::new(None),
            auto_reconnect_tx: watch::Sender::new(config.auto_reconnect),
            epoch_tx: watch::Sender::new(0),
            background_faulted: AtomicBool::new(false),
            supervisor: StdMutex::new(None),
            config,
        }
    }

    pub(crate) fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, core: &mut SessionCore, state: ConnectionState) {
        if core.state != state {
            debug!(from = %core.state, to = %state, "Session state change");
        }
        core.state = state;
        self.state_tx.send_replace(state);
    }

    pub(crate) fn publish_error(&self, error: impl Into<String>) {
        self.error_tx.send_replace(Some(error.into()));
    }

    /// Append to the visible log when it belongs to the loaded peer, and persist
    pub(crate) async fn record(&self, message: Message) {
        let shown = match (&*self.current_peer_tx.borrow(), &message.peer_address) {
            (Some(current), Some(address)) => current == address,
            _ => true,
        };
        if shown {
            self.messages_tx.send_modify(|log| log.push(message.clone()));
        }
        if let Err(e) = self.store.append(&message).await {
            warn!(error = %e, "Failed to persist message");
        }
    }

    /// Replace the visible log with the stored history of `peer`
    pub(crate) async fn load_history(&self, peer: &PeerAddress) -> SessionResult<()> {
        let history = self.store.query_by_peer(peer).await?;
        debug!(peer = %peer, messages = history.len(), "Loaded history");
        self.messages_tx.send_replace(history);
        self.current_peer_tx.send_replace(Some(peer.clone()));
        Ok(())
    }

    async fn load_history_or_empty(&self, peer: &PeerAddress) {
        if let Err(e) = self.load_history(peer).await {
            warn!(peer = %peer, error = %e, "Failed to load history");
            self.messages_tx.send_replace(Vec::new());
            self.current_peer_tx.send_replace(Some(peer.clone()));
        }
    }

    fn next_epoch(&self, core: &mut SessionCore) -> u64 {
        core.epoch += 1;
        self.epoch_tx.send_replace(core.epoch);
        core.epoch
    }

    /// Drop the link and invalidate its read loop and pending writes
    fn close_stream(&self, core: &mut SessionCore) {
        if let Some(task) = core.read_task.take() {
            task.abort();
        }
        core.writer = None;
        core.peer = None;
        self.next_epoch(core);
        self.peer_tx.send_replace(None);
    }

    fn cancel_reconnect(core: &mut SessionCore) {
        if let Some(timer) = core.reconnect.take() {
            debug!("Cancelled pending reconnect");
            timer.abort();
        }
    }

    pub(crate) async fn connect(self: &Arc<Self>, peer: PeerAddress) {
        let core = self.core.lock().await;
        self.connect_locked(core, peer).await;
    }

    /// Start a foreground race to `peer`; the guard is released once it runs
    async fn connect_locked(
        self: &Arc<Self>,
        mut core: MutexGuard<'_, SessionCore>,
        peer: PeerAddress,
    ) {
        if core.state == ConnectionState::Connected {
            info!(peer = %peer, "Closing current session before connecting");
            self.close_stream(&mut core);
        }

        core.policy.last_peer = Some(peer.clone());
        Self::cancel_reconnect(&mut core);
        self.error_tx.send_replace(None);
        self.set_state(&mut core, ConnectionState::Connecting);
        self.load_history_or_empty(&peer).await;

        let ticket = self.service.start_race(Some(peer));
        core.foreground = Some(ticket.id());
        drop(core);

        self.await_foreground(ticket);
    }

    fn await_foreground(self: &Arc<Self>, ticket: RaceTicket) {
        let weak = Arc::downgrade(self);
        let race = ticket.id();
        tokio::spawn(
            async move {
                let outcome = ticket.outcome().await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match outcome {
                    Some(RaceOutcome::Established { link, was_listener }) => {
                        debug!(was_listener, "Foreground race won");
                        inner.adopt(link, Some(race)).await;
                    }
                    Some(RaceOutcome::Failed(e)) => inner.on_race_failed(race, e).await,
                    Some(RaceOutcome::Lost) => {}
                    None => debug!("Foreground race cancelled"),
                }
            }
            .instrument(Span::current()),
        );
    }

    /// Make `link` the session's link
    ///
    /// Rejected (and the link closed) when a link is already adopted or when
    /// the race that produced it is no longer current.
    pub(crate) async fn adopt(self: &Arc<Self>, link: Link, race: Option<RaceId>) -> bool {
        let mut core = self.core.lock().await;

        if core.state == ConnectionState::Connected {
            warn!(peer = %link.remote().address, "Already connected; closing extra link");
            return false;
        }
        if let Some(race) = race
            && !self.service.is_current(race)
        {
            debug!(race, "Discarding link from superseded race");
            return false;
        }

        let (remote, reader, writer) = link.into_split();
        let loaded = self.current_peer_tx.borrow().as_ref() == Some(&remote.address);
        if !loaded {
            self.load_history_or_empty(&remote.address).await;
        }

        Self::cancel_reconnect(&mut core);
        let epoch = self.next_epoch(&mut core);
        core.writer = Some(Arc::new(Mutex::new(writer)));
        core.peer = Some(remote.clone());
        core.foreground = None;
        self.set_state(&mut core, ConnectionState::Connected);
        self.peer_tx.send_replace(Some(remote.clone()));
        core.read_task = Some(tokio::spawn(
            read_loop::run(
                Arc::downgrade(self),
                reader,
                remote.clone(),
                epoch,
                self.config.read_chunk_size,
            )
            .instrument(Span::current()),
        ));

        info!(peer = %remote.address, name = remote.display_name(), "Session established");
        self.record(Message::system(
            format!("Connected to {}", remote.display_name()),
            Some(&remote),
        ))
        .await;
        true
    }

    async fn on_race_failed(self: &Arc<Self>, race: RaceId, error: EstablishError) {
        let mut core = self.core.lock().await;
        if core.foreground != Some(race) {
            debug!(race, "Ignoring failure of superseded race");
            return;
        }
        core.foreground = None;

        warn!(error = %error, "Connection failed");
        self.set_state(&mut core, ConnectionState::Error);
        self.publish_error(error.to_string());
        self.schedule_reconnect(&mut core);
    }

    /// Record bytes read off the link, unless the link has been replaced
    pub(crate) async fn accept_inbound(&self, epoch: u64, peer: &PeerInfo, text: &str) -> bool {
        let core = self.core.lock().await;
        if core.epoch != epoch || core.state != ConnectionState::Connected {
            return false;
        }
        debug!(peer = %peer.address, bytes = text.len(), "Message received");
        self.record(Message::remote(text, peer)).await;
        true
    }

    /// The link of `epoch` ended; `None` means the peer closed it
    pub(crate) async fn on_stream_end(self: &Arc<Self>, epoch: u64, error: Option<TransportError>) {
        let mut core = self.core.lock().await;
        if core.epoch != epoch || core.state != ConnectionState::Connected {
            return;
        }

        let peer = core.peer.clone();
        // The read task is the caller; let it finish on its own
        core.read_task = None;
        self.close_stream(&mut core);
        self.service.stop();

        match error {
            None => {
                info!("Connection lost");
                self.set_state(&mut core, ConnectionState::Disconnected);
                self.record(Message::system("Connection lost", peer.as_ref()))
                    .await;
            }
            Some(e) => {
                warn!(error = %e, "Read failed");
                self.set_state(&mut core, ConnectionState::Error);
                self.publish_error(format!("Failed to read message: {}", e));
            }
        }
        self.schedule_reconnect(&mut core);
    }

    /// Arm the single reconnect timer if the policy allows it
    fn schedule_reconnect(self: &Arc<Self>, core: &mut SessionCore) {
        if !core.policy.enabled {
            return;
        }
        let Some(peer) = core.policy.last_peer.clone() else {
            return;
        };

        Self::cancel_reconnect(core);
        let delay = self.config.reconnect_delay;
        info!(peer = %peer, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        let weak: Weak<Self> = Arc::downgrade(self);
        core.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut core = inner.core.lock().await;
            core.reconnect = None;
            if !core.policy.enabled || core.state == ConnectionState::Connected {
                debug!("Reconnect no longer wanted");
                return;
            }
            let Some(peer) = core.policy.last_peer.clone() else {
                return;
            };
            // Same guard from policy check to race start; a disconnect
            // either lands before the check or after the race is running
            info!(peer = %peer, "Auto-reconnecting");
            inner.connect_locked(core, peer).await;
        }));
    }

    pub(crate) async fn disconnect(&self) {
        let mut core = self.core.lock().await;

        core.policy.enabled = false;
        core.policy.last_peer = None;
        self.auto_reconnect_tx.send_replace(false);
        Self::cancel_reconnect(&mut core);

        let peer = core.peer.clone();
        self.close_stream(&mut core);
        core.foreground = None;
        self.service.stop();
        self.set_state(&mut core, ConnectionState::Disconnected);

        info!("Disconnected");
        self.record(Message::system("Disconnected", peer.as_ref()))
            .await;
    }

    pub(crate) async fn send(&self, text: &str) -> SessionResult<()> {
        let (writer, peer, epoch) = {
            let core = self.core.lock().await;
            if core.state != ConnectionState::Connected {
                return Err(SessionError::NotConnected);
            }
            let Some(writer) = core.writer.clone() else {
                return Err(SessionError::Write("output stream not available".to_string()));
            };
            (writer, core.peer.clone(), core.epoch)
        };

        let mut epochs = self.epoch_tx.subscribe();
        let written = tokio::select! {
            written = async {
                let mut writer = writer.lock().await;
                writer.write_all(text.as_bytes()).await?;
                writer.flush().await
            } => written,
            _ = epochs.wait_for(|current| *current != epoch) => {
                debug!("Link closed while writing");
                return Err(SessionError::Write(TransportError::StreamClosed.to_string()));
            }
        };
        drop(writer);

        match written {
            Ok(()) => {
                let message = Message::local(self.config.local_sender.as_str(), text, peer.as_ref());
                self.record(message).await;
                Ok(())
            }
            Err(e) => {
                let e = TransportError::from(e);
                warn!(error = %e, "Write failed");
                let mut core = self.core.lock().await;
                if core.epoch == epoch {
                    self.close_stream(&mut core);
                    self.service.stop();
                    self.set_state(&mut core, ConnectionState::Error);
                }
                Err(SessionError::Write(e.to_string()))
            }
        }
    }

    pub(crate) async fn set_auto_reconnect(&self, enabled: bool) {
        let mut core = self.core.lock().await;
        core.policy.enabled = enabled;
        self.auto_reconnect_tx.send_replace(enabled);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(task) = core.read_task.take() {
            task.abort();
        }
        if let Some(timer) = core.reconnect.take() {
            timer.abort();
        }
        if let Ok(mut supervisor) = self.supervisor.lock()
            && let Some(task) = supervisor.take()
        {
            task.abort();
        }
    }
}
