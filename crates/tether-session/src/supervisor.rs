//! Background listening supervisor
//!
//! Keeps the device reachable while no session is up: every iteration it
//! starts a server-only race, unless a session exists or any race (a
//! foreground `connect` included) is already running. It never preempts.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, warn};

use tether_core::ConnectionState;
use tether_transport::RaceOutcome;

use crate::state::SessionInner;

pub(crate) async fn run(inner: Weak<SessionInner>) {
    info!("Background supervisor started");
    loop {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        let pause = tick(&strong);
        drop(strong);
        sleep(pause).await;
    }
    debug!("Background supervisor finished");
}

/// One iteration; returns how long to wait before the next
fn tick(inner: &Arc<SessionInner>) -> Duration {
    let faulted = inner.background_faulted.swap(false, Ordering::SeqCst);

    if inner.current_state() != ConnectionState::Connected
        && let Some(ticket) = inner.service.start_race_if_idle()
    {
        debug!(race = ticket.id(), "Background listening");
        let weak = Arc::downgrade(inner);
        let race = ticket.id();
        tokio::spawn(
            async move {
                match ticket.outcome().await {
                    Some(RaceOutcome::Established { link, .. }) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.adopt(link, Some(race)).await;
                        }
                    }
                    Some(RaceOutcome::Failed(e)) => {
                        warn!(error = %e, "Background listening failed");
                        if let Some(inner) = weak.upgrade() {
                            inner.background_faulted.store(true, Ordering::SeqCst);
                        }
                    }
                    Some(RaceOutcome::Lost) | None => {}
                }
            }
            .instrument(info_span!("background", race)),
        );
    }

    if faulted {
        inner.config.background_error_backoff
    } else {
        inner.config.background_interval
    }
}
