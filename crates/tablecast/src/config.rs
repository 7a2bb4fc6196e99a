//! Tunables for the broker bridge and the publisher.

use std::time::Duration;

use rand::Rng;

/// Reconnect policy for the broker bridge's subscriber connection.
///
/// After the subscriber connection is lost the bridge retries with
/// exponential backoff. Once `max_retries` consecutive attempts have failed
/// it gives up and the process runs local-only.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Consecutive failed connection attempts tolerated before degrading.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each retry.
    pub jitter: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(50),
        }
    }
}

impl BridgeConfig {
    /// Returns a copy with `max_delay` raised to at least `base_delay`.
    pub fn validated(mut self) -> Self {
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// `min(base_delay * 2^(attempt - 1), max_delay)` plus a random jitter
    /// in `[0, jitter]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return exponential;
        }
        exponential + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Settings for [`Publisher`](crate::Publisher).
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// How long a broker publish may take before the publisher falls back
    /// to local delivery.
    pub publish_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BridgeConfig {
        BridgeConfig {
            jitter: Duration::ZERO,
            ..BridgeConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let config = no_jitter();
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(400));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let config = no_jitter();
        assert_eq!(config.backoff(7), Duration::from_secs(5));
        assert_eq!(config.backoff(40), Duration::from_secs(5));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let config = BridgeConfig::default();
        for _ in 0..100 {
            let delay = config.backoff(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_validated_raises_max_delay() {
        let config = BridgeConfig {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(1),
            ..BridgeConfig::default()
        }
        .validated();
        assert_eq!(config.max_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_publisher_config_default() {
        assert_eq!(
            PublisherConfig::default().publish_timeout,
            Duration::from_secs(2)
        );
    }
}
