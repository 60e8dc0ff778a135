//! Session Repository
//!
//! The single owner of the current session. Wraps a [`ConnectionService`],
//! turns race outcomes into session state, runs the read loop of the
//! adopted link, and keeps the device reachable through the background
//! supervisor. Callers observe everything through watch channels.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use tether_core::{
    ConnectionState, Link, Message, MessageStore, PeerAddress, PeerInfo, RadioAdapter,
    TransportError,
};
use tether_transport::ConnectionService;

use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::history::{self, Conversation};
use crate::state::{AutoReconnectPolicy, SessionInner};
use crate::supervisor;

/// Owner of the one chat session
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionRepository {
    inner: Arc<SessionInner>,
}

impl SessionRepository {
    /// Create a repository over `radio`, persisting into `store`
    pub fn new(
        radio: Arc<dyn RadioAdapter>,
        store: Arc<dyn MessageStore>,
        config: SessionConfig,
    ) -> Self {
        let service = ConnectionService::new(radio, config.race.clone());
        Self {
            inner: Arc::new(SessionInner::new(service, store, config)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Start the background supervisor. Does nothing if it already runs.
    pub fn start_supervisor(&self) {
        let Ok(mut slot) = self.inner.supervisor.lock() else {
            warn!("Supervisor slot poisoned");
            return;
        };
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(supervisor::run(Arc::downgrade(&self.inner))));
    }

    /// Stop the background supervisor; a background race already running is left alone
    pub fn stop_supervisor(&self) {
        if let Ok(mut slot) = self.inner.supervisor.lock()
            && let Some(task) = slot.take()
        {
            debug!("Stopping background supervisor");
            task.abort();
        }
    }

    /// Connect to `peer`, replacing any race in flight
    ///
    /// Returns once the race is started; the outcome arrives on the state
    /// channel.
    #[instrument(skip(self), fields(peer = %peer))]
    pub async fn connect(&self, peer: PeerAddress) {
        info!("Connecting");
        self.inner.connect(peer).await;
    }

    /// Adopt a link that arrived without an explicit `connect`
    ///
    /// Returns false (and closes the link) when a session is already up.
    #[instrument(skip(self, link), fields(peer = %link.remote().address))]
    pub async fn handle_incoming_connection(&self, link: Link) -> bool {
        self.inner.adopt(link, None).await
    }

    /// Close the session and turn auto-reconnect off
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    /// Send `text` to the peer. On failure the reason is published on the
    /// error channel and false is returned.
    pub async fn send_message(&self, text: &str) -> bool {
        match self.try_send_message(text).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Send rejected");
                false
            }
        }
    }

    /// Like [`send_message`](Self::send_message), returning the error
    pub async fn try_send_message(&self, text: &str) -> SessionResult<()> {
        let result = self.inner.send(text).await;
        if let Err(e) = &result {
            self.inner.publish_error(e.to_string());
        }
        result
    }

    pub async fn set_auto_reconnect_enabled(&self, enabled: bool) {
        self.inner.set_auto_reconnect(enabled).await;
    }

    pub fn clear_error(&self) {
        self.inner.error_tx.send_replace(None);
    }

    /// Clear the visible log if it shows `peer`, and delete the stored history
    pub fn clear_messages_for_peer(&self, peer: &PeerAddress) {
        let loaded = self.inner.current_peer_tx.borrow().as_ref() == Some(peer);
        if loaded {
            self.inner.messages_tx.send_replace(Vec::new());
        }

        let store = self.inner.store.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            match store.delete_by_peer(&peer).await {
                Ok(()) => debug!(peer = %peer, "History deleted"),
                Err(e) => warn!(peer = %peer, error = %e, "Failed to delete history"),
            }
        });
    }

    /// Show the stored history of `peer`
    pub async fn load_messages_for_peer(&self, peer: &PeerAddress) -> SessionResult<()> {
        self.inner.load_history(peer).await
    }

    /// Every peer with history, most recently active first
    pub async fn conversations(&self) -> SessionResult<Vec<Conversation>> {
        history::conversations(self.inner.store.as_ref()).await
    }

    pub fn bonded_peers(&self) -> Vec<PeerInfo> {
        self.inner.service.radio().bonded_peers()
    }

    pub async fn start_discovery(&self) -> Result<(), TransportError> {
        self.inner.service.radio().start_discovery().await
    }

    pub async fn cancel_discovery(&self) {
        self.inner.service.radio().cancel_discovery().await;
    }

    pub async fn request_pairing(&self, peer: &PeerAddress) -> Result<(), TransportError> {
        self.inner.service.radio().request_pairing(peer).await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.messages_tx.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.messages_tx.subscribe()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.error_tx.borrow().clone()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<String>> {
        self.inner.error_tx.subscribe()
    }

    /// Peer of the current session
    pub fn connected_peer(&self) -> Option<PeerInfo> {
        self.inner.peer_tx.borrow().clone()
    }

    pub fn subscribe_connected_peer(&self) -> watch::Receiver<Option<PeerInfo>> {
        self.inner.peer_tx.subscribe()
    }

    /// Peer whose history the message log shows
    pub fn current_peer(&self) -> Option<PeerAddress> {
        self.inner.current_peer_tx.borrow().clone()
    }

    pub fn subscribe_current_peer(&self) -> watch::Receiver<Option<PeerAddress>> {
        self.inner.current_peer_tx.subscribe()
    }

    /// Snapshot of the auto-reconnect policy
    pub async fn auto_reconnect_policy(&self) -> AutoReconnectPolicy {
        self.inner.core.lock().await.policy.clone()
    }

    pub fn is_auto_reconnect_enabled(&self) -> bool {
        *self.inner.auto_reconnect_tx.borrow()
    }

    pub fn subscribe_auto_reconnect(&self) -> watch::Receiver<bool> {
        self.inner.auto_reconnect_tx.subscribe()
    }
}

impl std::fmt::Debug for SessionRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRepository")
            .field("state", &self.state())
            .field("peer", &self.connected_peer())
            .finish()
    }
}
