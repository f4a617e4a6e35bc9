//! Adaptive request pacing.
//!
//! Keeps a single inter-request delay that shrinks after a streak of
//! successes, grows after a streak of failures and doubles immediately when
//! the platform signals a hard rate limit.

use std::time::Duration;

use parking_lot::Mutex;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Configuration for the adaptive rate limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Lower bound for the delay, in milliseconds.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Upper bound for the delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Starting delay, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Consecutive successes needed before the delay shrinks.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Consecutive failures needed before the delay grows.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_decrease_factor")]
    pub decrease_factor: f64,
    #[serde(default = "default_increase_factor")]
    pub increase_factor: f64,
    /// Half-width of the uniform jitter added by [`AdaptiveRateLimiter::wait_with_jitter`].
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_success_threshold() -> u32 {
    5
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_decrease_factor() -> f64 {
    0.85
}

fn default_increase_factor() -> f64 {
    1.5
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            base_delay_ms: default_base_delay_ms(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
            decrease_factor: default_decrease_factor(),
            increase_factor: default_increase_factor(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RateLimiterConfig {
    #[inline]
    fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    #[inline]
    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms))
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.clamp(self.min_delay(), self.max_delay())
    }

    /// `delay * factor`, clamped to the configured bounds. A factor that does
    /// not yield a valid duration leaves the delay unchanged.
    fn scale(&self, delay: Duration, factor: f64) -> Duration {
        let scaled = Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay);
        self.clamp(scaled)
    }

    /// Check the adjustment factors: `decrease_factor` in `(0, 1]`,
    /// `increase_factor` finite and at least 1.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.decrease_factor.is_finite() && self.decrease_factor > 0.0 && self.decrease_factor <= 1.0) {
            return Err(format!(
                "rate_limiter.decrease_factor must be in (0, 1], got {}",
                self.decrease_factor
            ));
        }
        if !(self.increase_factor.is_finite() && self.increase_factor >= 1.0) {
            return Err(format!(
                "rate_limiter.increase_factor must be a finite number >= 1, got {}",
                self.increase_factor
            ));
        }
        Ok(())
    }
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimiterSnapshot {
    pub current_delay_ms: u64,
    pub success_streak: u32,
    pub failure_streak: u32,
    pub total_requests: u64,
    pub rate_limit_hits: u64,
}

#[derive(Debug)]
struct RateLimiterState {
    current_delay: Duration,
    success_streak: u32,
    failure_streak: u32,
    total_requests: u64,
    rate_limit_hits: u64,
    /// When the most recent request was (or is scheduled to be) sent.
    last_request_at: Option<Instant>,
}

/// Adaptive rate limiter shared by every request of one logical client.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    state: Mutex<RateLimiterState>,
    config: RateLimiterConfig,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let current_delay = config.clamp(Duration::from_millis(config.base_delay_ms));
        Self {
            state: Mutex::new(RateLimiterState {
                current_delay,
                success_streak: 0,
                failure_streak: 0,
                total_requests: 0,
                rate_limit_hits: 0,
                last_request_at: None,
            }),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn current_delay(&self) -> Duration {
        self.state.lock().current_delay
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let s = self.state.lock();
        RateLimiterSnapshot {
            current_delay_ms: s.current_delay.as_millis() as u64,
            success_streak: s.success_streak,
            failure_streak: s.failure_streak,
            total_requests: s.total_requests,
            rate_limit_hits: s.rate_limit_hits,
        }
    }

    /// Wait until `current_delay` has elapsed since the previous request.
    ///
    /// Returns the time spent waiting.
    pub async fn wait(&self) -> Duration {
        self.wait_inner(0).await
    }

    /// Like [`wait`](Self::wait) with uniform noise in `[-jitter, +jitter]`
    /// added to the computed wait, so requests do not form a periodic pattern.
    pub async fn wait_with_jitter(&self) -> Duration {
        let j = self.config.jitter_ms as i64;
        let jitter_ms = if j > 0 {
            rand::rng().random_range(-j..=j)
        } else {
            0
        };
        self.wait_inner(jitter_ms).await
    }

    async fn wait_inner(&self, jitter_ms: i64) -> Duration {
        // Reserve the slot while holding the lock, sleep without it.
        let wait = {
            let mut s = self.state.lock();
            let now = Instant::now();
            let wait = match s.last_request_at {
                Some(last) => {
                    let target = last + s.current_delay;
                    let base = target.saturating_duration_since(now);
                    apply_jitter(base, jitter_ms)
                }
                None => Duration::ZERO,
            };
            s.last_request_at = Some(now + wait);
            s.total_requests += 1;
            wait
        };

        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, "Rate limiter waiting");
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Record a successful request; shrinks the delay after a success streak.
    pub fn record_success(&self) {
        let mut s = self.state.lock();
        s.failure_streak = 0;
        s.success_streak += 1;
        if s.success_streak >= self.config.success_threshold {
            s.success_streak = 0;
            let previous = s.current_delay;
            s.current_delay = self.config.scale(previous, self.config.decrease_factor);
            if s.current_delay != previous {
                debug!(
                    from_ms = previous.as_millis() as u64,
                    to_ms = s.current_delay.as_millis() as u64,
                    "Success streak, decreasing request delay"
                );
            }
        }
    }

    /// Record a failed request; grows the delay after a failure streak.
    pub fn record_failure(&self, error: Option<&str>) {
        let mut s = self.state.lock();
        s.success_streak = 0;
        s.failure_streak += 1;
        if s.failure_streak >= self.config.failure_threshold {
            s.failure_streak = 0;
            let previous = s.current_delay;
            s.current_delay = self.config.scale(previous, self.config.increase_factor);
            debug!(
                from_ms = previous.as_millis() as u64,
                to_ms = s.current_delay.as_millis() as u64,
                error = error.unwrap_or("unknown"),
                "Failure streak, increasing request delay"
            );
        }
    }

    /// Hard rate-limit signal: double the delay now, regardless of streaks.
    pub fn record_rate_limit_hit(&self) {
        let mut s = self.state.lock();
        s.success_streak = 0;
        s.failure_streak = 0;
        s.rate_limit_hits += 1;
        let previous = s.current_delay;
        s.current_delay = self.config.clamp(previous.saturating_mul(2));
        warn!(
            from_ms = previous.as_millis() as u64,
            to_ms = s.current_delay.as_millis() as u64,
            hits = s.rate_limit_hits,
            "Rate limit hit, backing off"
        );
    }

    /// Return to the configured base delay and clear the streaks.
    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.current_delay = self
            .config
            .clamp(Duration::from_millis(self.config.base_delay_ms));
        s.success_streak = 0;
        s.failure_streak = 0;
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

fn apply_jitter(base: Duration, jitter_ms: i64) -> Duration {
    if jitter_ms >= 0 {
        base + Duration::from_millis(jitter_ms as u64)
    } else {
        base.saturating_sub(Duration::from_millis(jitter_ms.unsigned_abs()))
    }
}
