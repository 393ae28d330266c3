//! Capped exponential backoff with jitter, shared by every reconnect path.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Fraction of the anchor delay used as the jitter span on either side.
    pub jitter_ratio: f32,
    /// Minimum jitter span so short delays still spread out.
    pub jitter_min_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: 250,
            backoff_max_ms: 30_000,
            jitter_ratio: 0.2,
            jitter_min_ms: 25,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            attempt: 0,
        }
    }

    /// Un-jittered delay for the given 1-based attempt.
    fn anchor_delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = attempt.saturating_sub(1).min(32) as i32;
        let scaled = (self.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.backoff_max_ms as f64);
        capped.max(0.0) as u64
    }

    /// Pick a delay uniformly within the jitter window around `anchor_ms`,
    /// never exceeding the cap. `unit` is in `[0, 1)`.
    fn jittered_delay_ms(&self, anchor_ms: u64, unit: f64) -> u64 {
        if anchor_ms == 0 {
            return 0;
        }

        let max = self.backoff_max_ms as f64;
        let jitter_ratio = f64::from(self.jitter_ratio.max(0.0));
        let jitter_span = ((anchor_ms as f64) * jitter_ratio)
            .max(self.jitter_min_ms as f64)
            .min(max);

        let lower = 0f64.max(anchor_ms as f64 - jitter_span);
        let upper = (anchor_ms as f64 + jitter_span).min(max);
        if upper <= lower {
            return lower.round() as u64;
        }

        (lower + (upper - lower) * unit).round() as u64
    }
}

/// Attempt counter over a [`RetryPolicy`]. Reset it after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let anchor = self.policy.anchor_delay_ms(self.attempt);
        let unit: f64 = rand::rng().random();
        Duration::from_millis(self.policy.jittered_delay_ms(anchor, unit))
    }

    /// Sleep for the next delay. Returns `false` if cancelled first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            jitter_ratio: 0.0,
            jitter_min_ms: 0,
        }
    }

    #[test]
    fn anchor_doubles_until_capped() {
        let policy = policy();
        let delays: Vec<u64> =
            (1..=6).map(|n| policy.anchor_delay_ms(n)).collect();
        assert_eq!(delays, [100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(policy.anchor_delay_ms(u32::MAX), 1_000);
    }

    #[test]
    fn jitter_stays_within_window_and_cap() {
        let policy = RetryPolicy {
            jitter_ratio: 0.5,
            ..policy()
        };

        assert_eq!(policy.jittered_delay_ms(400, 0.0), 200);
        assert_eq!(policy.jittered_delay_ms(400, 0.999_999), 600);
        assert_eq!(policy.jittered_delay_ms(1_000, 0.999_999), 1_000);
    }

    #[test]
    fn backoff_never_exceeds_cap_and_resets() {
        let mut backoff = RetryPolicy {
            jitter_ratio: 0.3,
            jitter_min_ms: 10,
            ..policy()
        }
        .backoff();

        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_millis(1_000));
        }
        assert_eq!(backoff.attempt(), 20);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() <= Duration::from_millis(130));
    }

    #[tokio::test]
    async fn wait_returns_false_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut backoff = RetryPolicy {
            backoff_base_ms: 60_000,
            backoff_max_ms: 60_000,
            ..policy()
        }
        .backoff();

        assert!(!backoff.wait(&cancel).await);
    }
}
