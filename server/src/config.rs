//! Runtime settings for the capture server.

use shared::LOCK_DURATION_SECS;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub bind_addr: String,
    /// Maximum number of concurrent connections
    pub max_clients: usize,
    /// How long a captured territory stays locked
    pub lock_duration: Duration,
    /// How long a team may stay offline before its request is reaped.
    /// `None` keeps requests forever.
    pub orphan_timeout: Option<Duration>,
    /// How often the reaper runs
    pub reap_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            max_clients: 256,
            lock_duration: Duration::from_secs_f64(LOCK_DURATION_SECS),
            orphan_timeout: Some(Duration::from_secs(15 * 60)),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// Lock length for `--lock-minutes`, or `None` if it does not fit in a `Duration`.
pub fn lock_duration_from_minutes(minutes: u64) -> Option<Duration> {
    minutes.checked_mul(60).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_minutes_conversion() {
        assert_eq!(
            lock_duration_from_minutes(30),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(lock_duration_from_minutes(0), Some(Duration::ZERO));
    }

    #[test]
    fn test_lock_minutes_overflow_is_rejected() {
        assert_eq!(lock_duration_from_minutes(u64::MAX), None);
        assert_eq!(lock_duration_from_minutes(u64::MAX / 60 + 1), None);
    }

    #[test]
    fn test_default_lock_matches_protocol_constant() {
        assert_eq!(
            ServerConfig::default().lock_duration,
            lock_duration_from_minutes(30).unwrap()
        );
    }
}
