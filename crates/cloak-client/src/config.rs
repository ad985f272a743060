//! Client configuration.

use std::time::Duration;

/// Tunables for the client-side handshake driver.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Delay between polls while waiting for peer progress.
    pub poll_interval: Duration,
    /// Total wall-clock bound on waiting for a handshake to complete.
    /// Past it, the attempt is abandoned locally; the ledger record
    /// expires on its own.
    pub poll_deadline: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(2), poll_deadline: Duration::from_secs(120) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_deadline_is_two_minutes() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_deadline, Duration::from_secs(120));
        assert!(config.poll_interval < config.poll_deadline);
    }
}
