//! Connection Service
//!
//! Owns at most one establishment race at a time. Each call to
//! [`ConnectionService::start_race`] cancels whatever race was running and
//! hands back a [`RaceTicket`] that resolves exactly once. A race that gets
//! cancelled never resolves with an outcome; its ticket reports `None`.
//!
//! Winner selection is a check-and-set under the service lock: a race task
//! only delivers its link if it is still the current race, otherwise the
//! link is dropped (closed) on the spot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use tether_core::{PeerAddress, PeerInfo, RadioAdapter};

use crate::config::RaceConfig;
use crate::race::{RaceOutcome, run_race};

/// Identifier of one race, unique per service
pub type RaceId = u64;

/// The race that produced the current link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    pub race: RaceId,
    pub peer: PeerInfo,
    pub was_listener: bool,
}

#[derive(Default)]
struct ServiceState {
    /// Race whose outcome is still wanted
    current: Option<RaceId>,
    /// Task driving `current`, while it runs
    task: Option<JoinHandle<()>>,
    winner: Option<Winner>,
}

fn lock(state: &Mutex<ServiceState>) -> MutexGuard<'_, ServiceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the outcome of one race
#[derive(Debug)]
pub struct RaceTicket {
    id: RaceId,
    target: Option<PeerAddress>,
    rx: oneshot::Receiver<RaceOutcome>,
}

impl RaceTicket {
    pub fn id(&self) -> RaceId {
        self.id
    }

    /// Peer the initiator dials; `None` for a server-only race
    pub fn target(&self) -> Option<&PeerAddress> {
        self.target.as_ref()
    }

    /// Wait for the race to settle. `None` means it was cancelled.
    pub async fn outcome(self) -> Option<RaceOutcome> {
        self.rx.await.ok()
    }
}

/// Runs establishment races against a radio
pub struct ConnectionService {
    radio: Arc<dyn RadioAdapter>,
    config: Arc<RaceConfig>,
    state: Arc<Mutex<ServiceState>>,
    next_id: AtomicU64,
}

impl ConnectionService {
    pub fn new(radio: Arc<dyn RadioAdapter>, config: RaceConfig) -> Self {
        Self {
            radio,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(ServiceState::default())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    pub fn radio(&self) -> &Arc<dyn RadioAdapter> {
        &self.radio
    }

    /// Start a race, cancelling any race already running
    #[instrument(skip(self))]
    pub fn start_race(&self, target: Option<PeerAddress>) -> RaceTicket {
        let mut state = lock(&self.state);
        self.launch(&mut state, target)
    }

    /// Start a server-only race unless a race is running or a link is up
    pub fn start_race_if_idle(&self) -> Option<RaceTicket> {
        let mut state = lock(&self.state);
        if state.task.is_some() || state.winner.is_some() {
            return None;
        }
        Some(self.launch(&mut state, None))
    }

    fn launch(&self, state: &mut ServiceState, target: Option<PeerAddress>) -> RaceTicket {
        if let Some(previous) = state.task.take() {
            debug!(race = ?state.current, "Cancelling previous race");
            previous.abort();
        }
        state.winner = None;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let span = info_span!("race", race = id, target = ?target);

        // The task cannot observe `current` until this lock is released
        let task = tokio::spawn(
            Self::drive(
                self.radio.clone(),
                self.config.clone(),
                self.state.clone(),
                id,
                target.clone(),
                tx,
            )
            .instrument(span),
        );
        state.current = Some(id);
        state.task = Some(task);

        RaceTicket { id, target, rx }
    }

    async fn drive(
        radio: Arc<dyn RadioAdapter>,
        config: Arc<RaceConfig>,
        shared: Arc<Mutex<ServiceState>>,
        id: RaceId,
        target: Option<PeerAddress>,
        tx: oneshot::Sender<RaceOutcome>,
    ) {
        let outcome = run_race(radio.as_ref(), &config, target.as_ref()).await;

        let mut state = lock(&shared);
        if state.current != Some(id) {
            debug!("Discarding outcome of superseded race");
            return;
        }
        state.task = None;

        match &outcome {
            RaceOutcome::Established { link, was_listener } => {
                info!(peer = %link.remote().address, was_listener, "Race won");
                state.winner = Some(Winner {
                    race: id,
                    peer: link.remote().clone(),
                    was_listener: *was_listener,
                });
            }
            RaceOutcome::Failed(e) => warn!(error = %e, "Race failed"),
            RaceOutcome::Lost => {}
        }

        if tx.send(outcome).is_err() {
            debug!("Race outcome unclaimed; closing link");
            state.winner = None;
        }
    }

    /// Cancel the running race and forget the winner. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        if let Some(task) = state.task.take() {
            debug!(race = ?state.current, "Stopping race");
            task.abort();
        }
        state.current = None;
        state.winner = None;
    }

    pub fn is_racing(&self) -> bool {
        lock(&self.state).task.is_some()
    }

    /// True while `race` is the race whose outcome is wanted
    pub fn is_current(&self, race: RaceId) -> bool {
        lock(&self.state).current == Some(race)
    }

    /// True between a race being won and the next `stop` or `start_race`
    pub fn is_connected(&self) -> bool {
        lock(&self.state).winner.is_some()
    }

    pub fn winner(&self) -> Option<Winner> {
        lock(&self.state).winner.clone()
    }
}

impl Drop for ConnectionService {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.state).task.take() {
            task.abort();
        }
    }
}
