//! The establishment race
//!
//! A race runs a listener activity and, when a target peer is given, an
//! initiator activity concurrently. Each activity retries on its own
//! schedule. Whichever produces a link first wins; the other future is
//! dropped on the spot, which aborts its in-flight attempt and closes any
//! listen handle it held.

use std::future::Future;

use tokio::time::{Instant, sleep, sleep_until, timeout_at};
use tracing::{debug, info, warn};

use tether_core::{Link, PeerAddress, RadioAdapter, TransportError};

use crate::config::RaceConfig;
use crate::error::{EndReason, EstablishError};

/// Which side of the race produced (or failed to produce) a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Listener,
    Initiator,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listener => write!(f, "listener"),
            Self::Initiator => write!(f, "initiator"),
        }
    }
}

/// Result of one race, or of an established session ending
#[derive(Debug)]
pub enum RaceOutcome {
    /// A link exists; `was_listener` tells which role won
    Established { link: Link, was_listener: bool },
    /// No link could be formed
    Failed(EstablishError),
    /// An established link ended; produced by the session layer when its
    /// read loop hits end of stream, never by a race
    Lost,
}

impl RaceOutcome {
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }
}

/// Retry bookkeeping of one role within one race
#[derive(Debug, Clone)]
pub struct EstablishmentAttempt {
    pub role: Role,
    pub retry_count: u32,
    pub deadline: Option<Instant>,
}

impl EstablishmentAttempt {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            retry_count: 0,
            deadline: None,
        }
    }

    /// Count a new attempt and arm its deadline
    pub fn begin(&mut self, timeout: std::time::Duration) -> Instant {
        self.retry_count += 1;
        let deadline = Instant::now() + timeout;
        self.deadline = Some(deadline);
        deadline
    }

    /// Forget past attempts; used when a server-only listener re-arms
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.deadline = None;
    }

    pub fn exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}

/// How an activity finished
#[derive(Debug)]
pub(crate) enum ActivityEnd {
    Won(Link),
    Stopped(EndReason),
}

/// Run `op` once under the attempt's deadline
async fn attempt<F>(deadline: Instant, op: F) -> Result<Link, TransportError>
where
    F: Future<Output = Result<Link, TransportError>>,
{
    match timeout_at(deadline, op).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}

fn adapter_ready(radio: &dyn RadioAdapter) -> bool {
    radio.is_supported() && radio.is_enabled()
}

/// Listener activity
///
/// With `targeted` set the activity gives up after `max_retries` attempts.
/// Without it the activity cools down and starts over, forever.
pub(crate) async fn listen_activity(
    radio: &dyn RadioAdapter,
    config: &RaceConfig,
    targeted: bool,
) -> ActivityEnd {
    let mut state = EstablishmentAttempt::new(Role::Listener);

    loop {
        if !adapter_ready(radio) {
            warn!(role = %state.role, "Radio adapter unavailable");
            return ActivityEnd::Stopped(EndReason::Fatal(TransportError::AdapterUnavailable));
        }

        let deadline = state.begin(config.per_attempt_timeout);
        debug!(role = %state.role, attempt = state.retry_count, "Listening for inbound link");

        // The handle lives only inside this future and is closed when it ends
        let result = attempt(deadline, async {
            let mut handle = radio.listen(&config.service).await?;
            handle.accept().await
        })
        .await;

        match result {
            Ok(link) => {
                info!(peer = %link.remote().address, attempt = state.retry_count, "Accepted inbound link");
                return ActivityEnd::Won(link);
            }
            Err(e) if e.is_fatal() => {
                warn!(role = %state.role, error = %e, "Listener stopped");
                return ActivityEnd::Stopped(EndReason::Fatal(e));
            }
            Err(e) => {
                debug!(role = %state.role, attempt = state.retry_count, error = %e, "Listen attempt failed");
            }
        }

        if state.exhausted(config.max_retries) {
            if targeted {
                debug!(role = %state.role, attempts = state.retry_count, "Listener exhausted retries");
                return ActivityEnd::Stopped(EndReason::Exhausted);
            }
            debug!(
                cooldown_ms = config.relisten_cooldown.as_millis() as u64,
                "Listener re-arming after cooldown"
            );
            sleep(config.relisten_cooldown).await;
            state.reset();
        } else {
            sleep(config.retry_delay).await;
        }
    }
}

/// Initiator activity; dials `target` until a link forms or retries run out
pub(crate) async fn initiate_activity(
    radio: &dyn RadioAdapter,
    config: &RaceConfig,
    target: &PeerAddress,
) -> ActivityEnd {
    let mut state = EstablishmentAttempt::new(Role::Initiator);

    // Give the listener a head start on symmetric dual initiation
    sleep(config.initiator_startup_delay).await;

    loop {
        if !adapter_ready(radio) {
            warn!(role = %state.role, "Radio adapter unavailable");
            return ActivityEnd::Stopped(EndReason::Fatal(TransportError::AdapterUnavailable));
        }

        if radio.is_discovering() {
            radio.cancel_discovery().await;
        }

        let deadline = state.begin(config.per_attempt_timeout);
        debug!(peer = %target, attempt = state.retry_count, "Dialing peer");

        match attempt(deadline, radio.connect(target, &config.service)).await {
            Ok(link) => {
                info!(peer = %target, attempt = state.retry_count, "Outbound link established");
                return ActivityEnd::Won(link);
            }
            Err(e) if e.is_fatal() => {
                warn!(role = %state.role, error = %e, "Initiator stopped");
                return ActivityEnd::Stopped(EndReason::Fatal(e));
            }
            Err(e) => {
                debug!(peer = %target, attempt = state.retry_count, error = %e, "Connect attempt failed");
            }
        }

        if state.exhausted(config.max_retries) {
            debug!(role = %state.role, attempts = state.retry_count, "Initiator exhausted retries");
            return ActivityEnd::Stopped(EndReason::Exhausted);
        }
        sleep(config.retry_delay).await;
    }
}

/// Run one race to completion
///
/// Returns as soon as one role wins, the overall deadline of a targeted race
/// fires, or both roles have stopped. Roles still running at that point are
/// dropped.
pub async fn run_race(
    radio: &dyn RadioAdapter,
    config: &RaceConfig,
    target: Option<&PeerAddress>,
) -> RaceOutcome {
    let listener = listen_activity(radio, config, target.is_some());
    tokio::pin!(listener);

    let initiator = async {
        match target {
            Some(peer) => initiate_activity(radio, config, peer).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(initiator);

    let overall = target.map(|_| Instant::now() + config.overall_deadline());
    let deadline = async {
        match overall {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut listener_end: Option<EndReason> = None;
    let mut initiator_end: Option<EndReason> = match target {
        Some(_) => None,
        None => Some(EndReason::NotLaunched),
    };

    loop {
        tokio::select! {
            end = &mut listener, if listener_end.is_none() => match end {
                ActivityEnd::Won(link) => {
                    return RaceOutcome::Established { link, was_listener: true };
                }
                ActivityEnd::Stopped(reason) => listener_end = Some(reason),
            },
            end = &mut initiator, if initiator_end.is_none() => match end {
                ActivityEnd::Won(link) => {
                    return RaceOutcome::Established { link, was_listener: false };
                }
                ActivityEnd::Stopped(reason) => initiator_end = Some(reason),
            },
            _ = &mut deadline => {
                warn!(attempts = config.max_retries, "Race deadline expired");
                return RaceOutcome::Failed(EstablishError::Timeout {
                    attempts: config.max_retries,
                });
            }
        }

        if let (Some(listened), Some(initiated)) = (&listener_end, &initiator_end) {
            return RaceOutcome::Failed(EndReason::combine(listened, initiated));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_attempt_bookkeeping() {
        let mut state = EstablishmentAttempt::new(Role::Initiator);
        assert!(!state.exhausted(2));

        state.begin(Duration::from_secs(1));
        state.begin(Duration::from_secs(1));
        assert_eq!(state.retry_count, 2);
        assert!(state.exhausted(2));
        assert!(state.deadline.is_some());

        state.reset();
        assert_eq!(state.retry_count, 0);
        assert!(state.deadline.is_none());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Listener.to_string(), "listener");
        assert_eq!(Role::Initiator.to_string(), "initiator");
    }
}
