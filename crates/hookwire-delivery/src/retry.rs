//! Backoff policies for failed webhook deliveries.
//!
//! Every failed attempt schedules the next one a configurable distance in
//! the future. The default policy waits a fixed five minutes between
//! attempts and gives up after five of them, after which the job is parked
//! as permanently failed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How long to wait between delivery attempts for a job.
///
/// The policy also bounds the total number of attempts. Attempt numbers are
/// 1-based: the first dispatch of a job is attempt 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including the initial attempt).
    pub max_attempts: u32,

    /// Base delay between attempts. Also the claim lease duration, so no
    /// jitter or backoff curve may schedule a retry sooner than this.
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to spread retries of jobs that
    /// failed together.
    pub jitter_factor: f64,

    /// Curve used to grow delays across attempts.
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(3600),
            jitter_factor: 0.0,
            backoff: BackoffStrategy::Fixed,
        }
    }
}

/// Curve for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay between every attempt.
    Fixed,
    /// Delay doubles each attempt, starting from the base delay.
    Exponential,
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the job pending and try again at the given time.
    Retry {
        /// When the job becomes eligible for its next attempt.
        next_attempt_at: DateTime<Utc>,
    },
    /// Stop retrying and mark the job permanently failed.
    GiveUp {
        /// Why the job is being abandoned.
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides whether a job that just failed its `attempt_number`th attempt
    /// should be retried, and when.
    pub fn decide(&self, attempt_number: u32, failed_at: DateTime<Utc>) -> RetryDecision {
        if attempt_number >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) reached", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempt_number);
        let Ok(chrono_delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp { reason: "retry delay out of range".to_string() };
        };

        RetryDecision::Retry { next_attempt_at: failed_at + chrono_delay }
    }

    /// Calculates the delay after the given failed attempt.
    ///
    /// The result is always within `base_delay..=max_delay`. The lower bound
    /// matters: claimed jobs hold a lease of `base_delay`, and a shorter
    /// jittered delay would let a retry fire while the lease is still live.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        let raw_delay = match self.backoff {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Exponential => {
                let exponent = attempt_number.saturating_sub(1).min(20);
                let multiplier = 2_u32.saturating_pow(exponent);
                self.base_delay * multiplier
            },
        };

        let capped = std::cmp::min(raw_delay, self.max_delay);
        let jittered = apply_jitter(capped, self.jitter_factor);

        std::cmp::min(std::cmp::max(jittered, self.base_delay), self.max_delay)
    }

    /// Lease duration stamped on claimed jobs.
    ///
    /// A claimed job is invisible to other claimers for this long. If the
    /// process crashes mid-dispatch the job surfaces again once the lease
    /// expires, without its attempt counter having moved.
    pub fn claim_lease(&self) -> Duration {
        self.base_delay
    }
}

/// Randomizes a delay by up to `jitter_factor` in either direction.
///
/// With jitter_factor=0.25 a 100s delay lands anywhere in 75s..=125s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
