//! Configuration for the session layer

use std::time::Duration;

use tether_core::LOCAL_SENDER;
use tether_transport::RaceConfig;

/// Configuration for a [`SessionRepository`](crate::SessionRepository)
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Establishment race policy
    pub race: RaceConfig,
    /// Delay before an automatic reconnect
    pub reconnect_delay: Duration,
    /// Pause between background supervisor iterations
    pub background_interval: Duration,
    /// Pause after a background iteration that hit an error
    pub background_error_backoff: Duration,
    /// Upper bound of one read from the link
    pub read_chunk_size: usize,
    /// Initial auto-reconnect setting
    pub auto_reconnect: bool,
    /// Sender label on messages written here
    pub local_sender: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            race: RaceConfig::default(),
            reconnect_delay: Duration::from_secs(5),
            background_interval: Duration::from_secs(10),
            background_error_backoff: Duration::from_secs(15),
            read_chunk_size: 1024,
            auto_reconnect: true,
            local_sender: LOCAL_SENDER.to_string(),
        }
    }
}

impl SessionConfig {
    /// Set the race policy
    pub fn with_race(mut self, race: RaceConfig) -> Self {
        self.race = race;
        self
    }

    /// Set the auto-reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the background supervisor pauses
    pub fn with_background_timing(mut self, interval: Duration, error_backoff: Duration) -> Self {
        self.background_interval = interval;
        self.background_error_backoff = error_backoff;
        self
    }

    /// Set the read chunk size
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Set the initial auto-reconnect setting
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the label used for locally written messages
    pub fn with_local_sender(mut self, sender: impl Into<String>) -> Self {
        self.local_sender = sender.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.background_interval, Duration::from_secs(10));
        assert_eq!(config.background_error_backoff, Duration::from_secs(15));
        assert_eq!(config.read_chunk_size, 1024);
        assert!(config.auto_reconnect);
        assert_eq!(config.local_sender, "You");
        assert_eq!(config.race.max_retries, 5);
    }

    #[test]
    fn test_session_config_builders() {
        let config = SessionConfig::default()
            .with_auto_reconnect(false)
            .with_read_chunk_size(16)
            .with_local_sender("Me");
        assert!(!config.auto_reconnect);
        assert_eq!(config.read_chunk_size, 16);
        assert_eq!(config.local_sender, "Me");
    }
}
