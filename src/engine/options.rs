use serde::{Deserialize, Serialize};

use crate::error::{ReplayError, Result};

/// Per-run tuning supplied with a replay request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOptions {
    /// Divides post-action delays. Never applied to retry backoff.
    pub speed: f64,
    /// Extra attempts after the first one; zero means a single attempt.
    pub retry_count: u32,
    /// Wall-clock budget for the whole run.
    pub timeout_ms: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            retry_count: 3,
            timeout_ms: 60_000,
        }
    }
}

/// Options as they arrive on the wire, any field may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialOptions {
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl PartialOptions {
    pub fn resolve(self, defaults: ReplayOptions) -> ReplayOptions {
        ReplayOptions {
            speed: self.speed.unwrap_or(defaults.speed),
            retry_count: self.retry_count.unwrap_or(defaults.retry_count),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.timeout_ms),
        }
    }
}

/// Bounds every run is validated against before any action executes.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayLimits {
    pub allowed_speeds: Vec<f64>,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for ReplayLimits {
    fn default() -> Self {
        Self {
            allowed_speeds: vec![0.5, 1.0, 1.5, 2.0],
            min_timeout_ms: 5_000,
            max_timeout_ms: 300_000,
        }
    }
}

impl ReplayLimits {
    /// Rejects out-of-set speeds and out-of-range timeouts. Values are never clamped.
    pub fn validate(&self, action_count: usize, options: &ReplayOptions) -> Result<()> {
        if action_count == 0 {
            return Err(ReplayError::Validation(
                "action list must not be empty".into(),
            ));
        }
        if !self
            .allowed_speeds
            .iter()
            .any(|allowed| (allowed - options.speed).abs() < f64::EPSILON)
        {
            return Err(ReplayError::Validation(format!(
                "speed {} is not one of {:?}",
                options.speed, self.allowed_speeds
            )));
        }
        if options.timeout_ms < self.min_timeout_ms || options.timeout_ms > self.max_timeout_ms {
            return Err(ReplayError::Validation(format!(
                "timeoutMs {} outside [{}, {}]",
                options.timeout_ms, self.min_timeout_ms, self.max_timeout_ms
            )));
        }
        Ok(())
    }
}

/// Configuration for retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay before retry `attempt` (1-based).
    /// delay = base_delay_ms * multiplier^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let multiplier = self.backoff_multiplier.max(1.0);
        let delay = self.base_delay_ms as f64 * multiplier.powi(exponent);
        if delay >= u64::MAX as f64 {
            u64::MAX
        } else {
            delay as u64
        }
    }
}

/// Scales a post-action delay by the run speed.
pub fn scaled_delay_ms(delay_ms: u64, speed: f64) -> u64 {
    if delay_ms == 0 || speed <= 0.0 {
        return delay_ms;
    }
    (delay_ms as f64 / speed).round() as u64
}
