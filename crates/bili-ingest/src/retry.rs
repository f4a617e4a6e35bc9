//! Linear retry policy shared by the request client and the sync orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry budget with a delay that grows linearly per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay unit in milliseconds; retry `n` waits `n * base_delay_ms`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(retry)))
    }

    /// Whether retry number `retry` (1-based) is still within budget.
    #[inline]
    pub fn should_retry(&self, retry: u32) -> bool {
        retry <= self.max_retries
    }

    /// Total time spent sleeping if every retry is used.
    pub fn max_total_delay(&self) -> Duration {
        (1..=self.max_retries)
            .map(|r| self.delay_for_retry(r))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}
