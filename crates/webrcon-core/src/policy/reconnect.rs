//! Exponential reconnect backoff with an attempt ceiling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the reconnect policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect attempts allowed after an abnormal close before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first attempt, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay on each further attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 { 50 }
fn default_base_delay_ms() -> u64 { 1_000 }
fn default_multiplier() -> f64 { 1.3 }
fn default_max_delay_ms() -> u64 { 15_000 }

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Stateless reconnect policy: computes the delay for a given attempt.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub config: ReconnectConfig,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th reconnect (1-based):
    /// `min(base × multiplier^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = base_ms.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped.round() as u64)
    }

    /// Returns `true` if another attempt may be scheduled after
    /// `attempts_made` attempts.
    pub fn can_attempt(&self, attempts_made: u32) -> bool {
        attempts_made < self.config.max_attempts
    }
}
