use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use deepresearch_common::{ResearchError, Result};

/// Per-key pacing of outbound calls. Keys are provider names; each key's
/// allowance is tracked independently so one saturated provider never stalls
/// another. `acquire` backpressures rather than rejecting — the only failure
/// is a caller-supplied deadline expiring while waiting.
pub struct RateLimiter {
    pacers: Mutex<HashMap<String, Pacer>>,
}

/// Pacing state for one key. Allowance accrues continuously at the key's
/// request rate, capped at two seconds' worth of requests (the burst window).
struct Pacer {
    allowance: f64,
    rate: f64,
    refreshed: Instant,
}

impl Pacer {
    fn new(rate: f64) -> Self {
        Self {
            allowance: rate,
            rate,
            refreshed: Instant::now(),
        }
    }

    /// Take one request's worth of allowance if it has accrued; otherwise
    /// report how long the caller must wait for it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let accrued = now.duration_since(self.refreshed).as_secs_f64() * self.rate;
        self.allowance = (self.allowance + accrued).min(self.rate * 2.0);
        self.refreshed = now;

        if self.allowance >= 1.0 {
            self.allowance -= 1.0;
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.allowance) / self.rate)
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            pacers: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a permit for `key` at `rps` requests per second, waiting as
    /// long as needed up to `deadline`.
    pub async fn acquire(&self, key: &str, rps: f64, deadline: Duration) -> Result<()> {
        let give_up_at = Instant::now() + deadline;

        loop {
            let wait = {
                let mut pacers = self.pacers.lock().await;
                pacers
                    .entry(key.to_string())
                    .or_insert_with(|| Pacer::new(rps))
                    .reserve()
            };

            if wait.is_zero() {
                return Ok(());
            }

            if Instant::now() + wait > give_up_at {
                return Err(ResearchError::BudgetExceeded(format!(
                    "rate limit deadline reached for {}",
                    key
                )));
            }

            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_within_burst_is_immediate() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter
            .acquire("tavily", 10.0, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_acquire_paces_after_burst() {
        let limiter = RateLimiter::new();
        // Burst capacity is 2x rate; drain it, then the next acquire waits.
        for _ in 0..4 {
            limiter
                .acquire("slow", 2.0, Duration::from_secs(10))
                .await
                .unwrap();
        }
        let start = Instant::now();
        limiter
            .acquire("slow", 2.0, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let limiter = RateLimiter::new();
        for _ in 0..2 {
            limiter
                .acquire("tight", 1.0, Duration::from_secs(10))
                .await
                .unwrap();
        }
        let err = limiter
            .acquire("tight", 1.0, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::BudgetExceeded(_)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..4 {
            limiter
                .acquire("busy", 2.0, Duration::from_secs(10))
                .await
                .unwrap();
        }
        // "busy" is drained; "idle" must still be immediate.
        let start = Instant::now();
        limiter
            .acquire("idle", 2.0, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_allowance_accrues_while_idle() {
        let limiter = RateLimiter::new();
        // Drain the burst at 20 rps, idle briefly, then acquire again
        // without waiting: the idle time refilled the allowance.
        for _ in 0..40 {
            limiter
                .acquire("refill", 20.0, Duration::from_secs(10))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let start = Instant::now();
        limiter
            .acquire("refill", 20.0, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
