//! Retry, timeout, and backoff policy for establishment races

use std::time::Duration;

use tether_core::ServiceId;

/// Configuration for establishment races
#[derive(Debug, Clone)]
pub struct RaceConfig {
    /// How long one listen or connect attempt may wait
    pub per_attempt_timeout: Duration,
    /// Pause between attempts of the same role
    pub retry_delay: Duration,
    /// Head start the listener gets before the initiator dials
    pub initiator_startup_delay: Duration,
    /// Attempts per role before it gives up
    pub max_retries: u32,
    /// Pause before a server-only listener re-arms after exhausting its attempts
    pub relisten_cooldown: Duration,
    /// Service record both roles use
    pub service: ServiceId,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            per_attempt_timeout: Duration::from_secs(15),
            retry_delay: Duration::from_secs(2),
            initiator_startup_delay: Duration::from_millis(500),
            max_retries: 5,
            relisten_cooldown: Duration::from_secs(5),
            service: ServiceId::default(),
        }
    }
}

impl RaceConfig {
    /// Deadline for a targeted race as a whole
    pub fn overall_deadline(&self) -> Duration {
        self.per_attempt_timeout * self.max_retries
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_initiator_startup_delay(mut self, delay: Duration) -> Self {
        self.initiator_startup_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_relisten_cooldown(mut self, cooldown: Duration) -> Self {
        self.relisten_cooldown = cooldown;
        self
    }

    pub fn with_service(mut self, service: ServiceId) -> Self {
        self.service = service;
        self
    }
}
