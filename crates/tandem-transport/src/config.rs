//! Reconnection policy.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::socket::SocketError;

/// Tunables of a [`ReconnectingSocket`](crate::ReconnectingSocket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Upper bound of the reconnection delay.
    #[serde(default = "default_max_reconnection_delay")]
    pub max_reconnection_delay_ms: u64,

    /// Delay before the first retry. Defaults to a random value in
    /// `[1000, 5000)` so that many clients do not retry in lockstep.
    #[serde(default = "default_min_reconnection_delay")]
    pub min_reconnection_delay_ms: u64,

    /// How long a connection must stay open before the retry counter resets.
    #[serde(default = "default_min_uptime")]
    pub min_uptime_ms: u64,

    /// Multiplier applied to the delay on each further retry.
    #[serde(default = "default_grow_factor")]
    pub reconnection_delay_grow_factor: f64,

    /// How long an attempt may take before it is abandoned.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,

    /// Maximum number of retries (`None` = unlimited).
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Maximum number of queued outbound messages (`None` = unlimited).
    #[serde(default)]
    pub max_enqueued_messages: Option<usize>,

    /// Do not connect until `reconnect` is called.
    #[serde(default)]
    pub start_closed: bool,

    /// Trace every state machine step.
    #[serde(default)]
    pub debug: bool,
}

fn default_max_reconnection_delay() -> u64 {
    10_000
}

fn default_min_reconnection_delay() -> u64 {
    1_000 + rand::thread_rng().gen_range(0..4_000)
}

fn default_min_uptime() -> u64 {
    5_000
}

fn default_grow_factor() -> f64 {
    1.3
}

fn default_connection_timeout() -> u64 {
    4_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_reconnection_delay_ms: default_max_reconnection_delay(),
            min_reconnection_delay_ms: default_min_reconnection_delay(),
            min_uptime_ms: default_min_uptime(),
            reconnection_delay_grow_factor: default_grow_factor(),
            connection_timeout_ms: default_connection_timeout(),
            max_retries: None,
            max_enqueued_messages: None,
            start_closed: false,
            debug: false,
        }
    }
}

impl ReconnectConfig {
    /// Set the minimum reconnection delay.
    #[must_use]
    pub fn with_min_reconnection_delay(mut self, delay: Duration) -> Self {
        self.min_reconnection_delay_ms = duration_ms(delay);
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn with_max_reconnection_delay(mut self, delay: Duration) -> Self {
        self.max_reconnection_delay_ms = duration_ms(delay);
        self
    }

    /// Set the delay growth factor.
    #[must_use]
    pub fn with_grow_factor(mut self, factor: f64) -> Self {
        self.reconnection_delay_grow_factor = factor;
        self
    }

    /// Set the minimum uptime.
    #[must_use]
    pub fn with_min_uptime(mut self, uptime: Duration) -> Self {
        self.min_uptime_ms = duration_ms(uptime);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = duration_ms(timeout);
        self
    }

    /// Limit the number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Limit the number of queued outbound messages.
    #[must_use]
    pub fn with_max_enqueued_messages(mut self, max: usize) -> Self {
        self.max_enqueued_messages = Some(max);
        self
    }

    /// Start without connecting.
    #[must_use]
    pub fn with_start_closed(mut self, start_closed: bool) -> Self {
        self.start_closed = start_closed;
        self
    }

    /// Enable state machine tracing.
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Get the minimum uptime.
    #[must_use]
    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    /// Get the connection timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Delay before the attempt with the given retry count.
    ///
    /// Zero for the first attempt, then
    /// `min(max, min * grow^(retry_count - 1))`.
    #[must_use]
    pub fn reconnect_delay(&self, retry_count: i64) -> Duration {
        if retry_count <= 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry_count - 1).unwrap_or(i32::MAX);
        let grown = self.min_reconnection_delay_ms as f64
            * self.reconnection_delay_grow_factor.powi(exponent);
        let capped = grown.min(self.max_reconnection_delay_ms as f64);

        Duration::from_millis(capped.round() as u64)
    }

    /// Check the policy for values the state machine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns an error if the grow factor is below one or not finite. A
    /// minimum delay above the maximum is accepted; every delay is capped at
    /// the maximum.
    pub fn validate(&self) -> Result<(), SocketError> {
        if !self.reconnection_delay_grow_factor.is_finite()
            || self.reconnection_delay_grow_factor < 1.0
        {
            return Err(SocketError::InvalidConfig(format!(
                "reconnection_delay_grow_factor must be >= 1, got {}",
                self.reconnection_delay_grow_factor
            )));
        }

        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> ReconnectConfig {
        ReconnectConfig::default().with_min_reconnection_delay(Duration::from_millis(1000))
    }

    #[test]
    fn test_default_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_reconnection_delay_ms, 10_000);
        assert!((1_000..5_000).contains(&config.min_reconnection_delay_ms));
        assert_eq!(config.min_uptime_ms, 5_000);
        assert_eq!(config.connection_timeout_ms, 4_000);
        assert!(config.max_retries.is_none());
        assert!(config.max_enqueued_messages.is_none());
        assert!(!config.start_closed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_sequence() {
        let config = fixed();
        assert_eq!(config.reconnect_delay(0), Duration::ZERO);
        assert_eq!(config.reconnect_delay(1), Duration::from_millis(1000));
        assert_eq!(config.reconnect_delay(2), Duration::from_millis(1300));
        assert_eq!(config.reconnect_delay(3), Duration::from_millis(1690));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = fixed();
        assert_eq!(config.reconnect_delay(10), Duration::from_millis(10_000));
        assert_eq!(config.reconnect_delay(1_000), Duration::from_millis(10_000));
    }

    #[test]
    fn test_negative_retry_count_connects_immediately() {
        assert_eq!(fixed().reconnect_delay(-1), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(fixed().with_grow_factor(0.5).validate().is_err());
        assert!(fixed().with_grow_factor(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_small_max_delay_with_jittered_min_is_valid() {
        for _ in 0..200 {
            let config =
                ReconnectConfig::default().with_max_reconnection_delay(Duration::from_millis(3000));
            assert!(config.validate().is_ok());
            assert!(config.reconnect_delay(1) <= Duration::from_millis(3000));
            assert_eq!(config.reconnect_delay(10), Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ReconnectConfig =
            serde_json::from_str(r#"{"max_retries": 3, "min_reconnection_delay_ms": 250}"#)
                .unwrap();
        assert_eq!(config.max_retries, Some(3));
        assert_eq!(config.min_reconnection_delay_ms, 250);
        assert_eq!(config.max_reconnection_delay_ms, 10_000);
    }
}
