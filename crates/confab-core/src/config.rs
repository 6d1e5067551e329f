//! Per-conversation tuning.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Default transcript retention window (1 hour).
pub const DEFAULT_RETENTION_SECS: u64 = 60 * 60;

/// Default maximum delayed messages waiting in one conversation.
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// Default inbound event queue capacity.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 100;

/// Longest accepted retention window (one year).
pub const MAX_RETENTION_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted verification timeout (one day).
pub const MAX_VERIFICATION_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Default width of generated verification PINs.
pub const DEFAULT_PIN_DIGITS: u32 = 6;

fn default_retention() -> u64 {
    DEFAULT_RETENTION_SECS
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_event_queue_capacity() -> usize {
    DEFAULT_EVENT_QUEUE_CAPACITY
}

fn default_pin_digits() -> u32 {
    DEFAULT_PIN_DIGITS
}

/// Configuration for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    /// Transcript content older than this is compacted away on hide/show.
    #[serde(default = "default_retention")]
    pub retention_window_secs: u64,
    /// How long a verification may wait for the peer. `None` waits forever.
    #[serde(default)]
    pub verification_timeout_secs: Option<u64>,
    /// Upper bound on queued delayed messages.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Capacity of the inbound event channel.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    /// Number of decimal digits in a generated PIN.
    #[serde(default = "default_pin_digits")]
    pub pin_digits: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            retention_window_secs: DEFAULT_RETENTION_SECS,
            verification_timeout_secs: None,
            max_pending: DEFAULT_MAX_PENDING,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            pin_digits: DEFAULT_PIN_DIGITS,
        }
    }
}

impl ConversationConfig {
    /// Retention window as a duration.
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_window_secs.min(MAX_RETENTION_SECS) as i64)
    }

    /// Verification timeout as a duration, if enabled.
    pub fn verification_timeout(&self) -> Option<Duration> {
        self.verification_timeout_secs.map(Duration::from_secs)
    }

    /// Override fields from `CONFAB_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(value) = env_parse::<u64>("CONFAB_RETENTION_SECS") {
            self.retention_window_secs = value;
        }
        if let Some(value) = env_parse::<u64>("CONFAB_VERIFY_TIMEOUT_SECS") {
            self.verification_timeout_secs = (value > 0).then_some(value);
        }
        if let Some(value) = env_parse::<usize>("CONFAB_MAX_PENDING") {
            self.max_pending = value;
        }
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.retention_window_secs == 0 {
            return Err(Error::Config("retention window must be positive".into()));
        }
        if self.retention_window_secs > MAX_RETENTION_SECS {
            return Err(Error::Config(format!(
                "retention window {}s exceeds {}s",
                self.retention_window_secs, MAX_RETENTION_SECS
            )));
        }
        if let Some(timeout) = self.verification_timeout_secs {
            if timeout == 0 || timeout > MAX_VERIFICATION_TIMEOUT_SECS {
                return Err(Error::Config(format!(
                    "verification timeout {}s outside 1..={}s",
                    timeout, MAX_VERIFICATION_TIMEOUT_SECS
                )));
            }
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::Config("event queue capacity must be positive".into()));
        }
        if !(4..=9).contains(&self.pin_digits) {
            return Err(Error::Config(format!(
                "pin width {} outside 4..=9",
                self.pin_digits
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, "Ignoring unparsable configuration override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConversationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retention_window(), chrono::Duration::hours(1));
        assert_eq!(config.verification_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ConversationConfig {
            retention_window_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ConversationConfig {
            pin_digits: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_durations() {
        let config = ConversationConfig {
            retention_window_secs: 10_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert_eq!(
            config.retention_window(),
            chrono::Duration::seconds(MAX_RETENTION_SECS as i64)
        );

        let config = ConversationConfig {
            verification_timeout_secs: Some(u64::MAX),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ConversationConfig {
            retention_window_secs: MAX_RETENTION_SECS,
            verification_timeout_secs: Some(MAX_VERIFICATION_TIMEOUT_SECS),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_env_overrides() {
        std::env::set_var("CONFAB_VERIFY_TIMEOUT_SECS", "90");
        std::env::set_var("CONFAB_MAX_PENDING", "not-a-number");
        let mut config = ConversationConfig::default();
        config.apply_env();
        std::env::remove_var("CONFAB_VERIFY_TIMEOUT_SECS");
        std::env::remove_var("CONFAB_MAX_PENDING");

        assert_eq!(config.verification_timeout_secs, Some(90));
        assert_eq!(config.max_pending, DEFAULT_MAX_PENDING);
    }
}
