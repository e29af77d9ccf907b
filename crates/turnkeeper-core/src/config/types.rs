//! Configuration types for the interaction controller.
//!
//! [`ControllerConfig`] is deserialized from the `[controller]` table of
//! `turnkeeper.toml`. Every field has a default so an absent or partial table
//! still yields a working controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::recovery::PollBound;

const DEFAULT_ADVISORY_TEXT: &str = "This conversation is stuck in an error state and automatic \
recovery did not succeed. Use the retry or edit control on the last message, or reload the \
conversation. Queued messages are kept.";

fn default_queue_capacity() -> usize {
    3
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_environment_poll_interval_ms() -> u64 {
    1000
}

fn default_recovery_poll_attempts() -> u32 {
    20
}

fn default_recovery_poll_interval_ms() -> u64 {
    100
}

fn default_send_settle_ms() -> u64 {
    1500
}

fn default_recovery_cooldown_ms() -> u64 {
    3000
}

fn default_advisory_text() -> String {
    DEFAULT_ADVISORY_TEXT.to_string()
}

/// Resolved controller configuration.
///
/// # Example `turnkeeper.toml`
///
/// ```toml
/// [controller]
/// queue_capacity = 5
/// debounce_ms = 150
/// recovery_poll_attempts = 30
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Maximum queued messages (default: `3`).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Quiet period before a burst of change notifications produces a tick
    /// (default: `100`).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Coarse periodic re-evaluation interval (default: `1000`).
    #[serde(default = "default_environment_poll_interval_ms")]
    pub environment_poll_interval_ms: u64,

    /// Edit-mode polls before edit-and-resend gives up (default: `20`).
    #[serde(default = "default_recovery_poll_attempts")]
    pub recovery_poll_attempts: u32,

    /// Delay between edit-mode polls (default: `100`).
    #[serde(default = "default_recovery_poll_interval_ms")]
    pub recovery_poll_interval_ms: u64,

    /// How long the agent is assumed busy after a send when no busy signal
    /// shows up (default: `1500`).
    #[serde(default = "default_send_settle_ms")]
    pub send_settle_ms: u64,

    /// Minimum gap between automatic recovery passes (default: `3000`).
    #[serde(default = "default_recovery_cooldown_ms")]
    pub recovery_cooldown_ms: u64,

    /// Text of the advisory shown when recovery is exhausted.
    #[serde(default = "default_advisory_text")]
    pub advisory_text: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            debounce_ms: default_debounce_ms(),
            environment_poll_interval_ms: default_environment_poll_interval_ms(),
            recovery_poll_attempts: default_recovery_poll_attempts(),
            recovery_poll_interval_ms: default_recovery_poll_interval_ms(),
            send_settle_ms: default_send_settle_ms(),
            recovery_cooldown_ms: default_recovery_cooldown_ms(),
            advisory_text: default_advisory_text(),
        }
    }
}

impl ControllerConfig {
    /// Clamp values that would break the controller to their minimums.
    ///
    /// Capacity and poll attempts are at least one; poll intervals are at
    /// least one millisecond (a zero-period timer is invalid).
    pub fn normalized(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self.recovery_poll_attempts = self.recovery_poll_attempts.max(1);
        self.recovery_poll_interval_ms = self.recovery_poll_interval_ms.max(1);
        self.environment_poll_interval_ms = self.environment_poll_interval_ms.max(1);
        if self.advisory_text.trim().is_empty() {
            self.advisory_text = default_advisory_text();
        }
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn environment_poll_interval(&self) -> Duration {
        Duration::from_millis(self.environment_poll_interval_ms.max(1))
    }

    pub fn send_settle(&self) -> Duration {
        Duration::from_millis(self.send_settle_ms)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_millis(self.recovery_cooldown_ms)
    }

    pub fn poll_bound(&self) -> PollBound {
        PollBound {
            attempts: self.recovery_poll_attempts.max(1),
            interval: Duration::from_millis(self.recovery_poll_interval_ms.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.queue_capacity, 3);
        assert_eq!(cfg.debounce(), Duration::from_millis(100));
        assert_eq!(cfg.poll_bound(), PollBound::default());
        assert_eq!(cfg.environment_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.send_settle(), Duration::from_millis(1500));
        assert_eq!(cfg.recovery_cooldown(), Duration::from_secs(3));
        assert!(!cfg.advisory_text.is_empty());
    }

    #[test]
    fn toml_partial_uses_defaults() {
        let cfg: ControllerConfig = toml::from_str("queue_capacity = 5\n").unwrap();
        assert_eq!(cfg.queue_capacity, 5);
        assert_eq!(cfg.debounce_ms, 100);
        assert_eq!(cfg.recovery_poll_attempts, 20);
    }

    #[test]
    fn toml_empty_uses_all_defaults() {
        let cfg: ControllerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ControllerConfig::default());
    }

    #[test]
    fn normalized_clamps_degenerate_values() {
        let cfg = ControllerConfig {
            queue_capacity: 0,
            recovery_poll_attempts: 0,
            recovery_poll_interval_ms: 0,
            environment_poll_interval_ms: 0,
            advisory_text: "   ".to_string(),
            ..Default::default()
        }
        .normalized();
        assert_eq!(cfg.queue_capacity, 1);
        assert_eq!(cfg.recovery_poll_attempts, 1);
        assert_eq!(cfg.recovery_poll_interval_ms, 1);
        assert_eq!(cfg.environment_poll_interval_ms, 1);
        assert_eq!(cfg.advisory_text, DEFAULT_ADVISORY_TEXT);
    }
}
