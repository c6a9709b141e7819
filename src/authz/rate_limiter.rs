// Per-agent sliding-window rate limiting

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::future::Cache;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of a quota evaluation.
#[derive(Debug, Clone)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub remaining: u32,
    /// When the oldest counted request leaves the window - only set on denial.
    pub retry_after: Option<Duration>,
}

/// Sliding-window limiter keyed by agent id.
///
/// Each agent owns a timestamp deque behind its own mutex, held in a moka
/// cache so idle agents age out. The check-then-record step runs under
/// that per-agent lock, so two concurrent requests from one agent cannot
/// both pass a quota only one should pass. There is no lock shared across
/// agents.
pub struct SlidingWindowRateLimiter {
    windows: Cache<String, Arc<Mutex<VecDeque<DateTime<Utc>>>>>,
    window: ChronoDuration,
}

impl SlidingWindowRateLimiter {
    pub fn new() -> Self {
        Self::with_window(ChronoDuration::hours(1))
    }

    pub fn with_window(window: ChronoDuration) -> Self {
        // Idle agents are garbage-collected after two windows
        let idle = window
            .to_std()
            .unwrap_or(Duration::from_secs(3600))
            .saturating_mul(2);
        Self {
            windows: Cache::builder()
                .time_to_idle(idle)
                .max_capacity(100_000)
                .build(),
            window,
        }
    }

    /// Evaluate and, when under quota, record one request atomically.
    ///
    /// Post-condition: the window count never exceeds `quota`.
    pub async fn check_and_record(&self, agent_id: &str, quota: u32) -> QuotaCheck {
        let slot = self
            .windows
            .get_with(agent_id.to_string(), async {
                Arc::new(Mutex::new(VecDeque::new()))
            })
            .await;

        let now = Utc::now();
        let cutoff = now - self.window;

        // A poisoned lock is recovered, not propagated; the deque stays
        // structurally valid across any panic point
        let mut deque = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        while let Some(front) = deque.front() {
            if *front < cutoff {
                deque.pop_front();
            } else {
                break;
            }
        }

        let count = deque.len() as u32;
        if count >= quota {
            let retry_after = deque
                .front()
                .map(|oldest| *oldest + self.window - now)
                .and_then(|d| d.to_std().ok());
            return QuotaCheck {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        deque.push_back(now);
        QuotaCheck {
            allowed: true,
            remaining: quota - count - 1,
            retry_after: None,
        }
    }

    /// Current count inside the window, without recording.
    pub async fn current_count(&self, agent_id: &str) -> u32 {
        let Some(slot) = self.windows.get(agent_id).await else {
            return 0;
        };
        let cutoff = Utc::now() - self.window;
        let deque = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        deque.iter().filter(|t| **t >= cutoff).count() as u32
    }
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_enforced_at_boundary() {
        let limiter = SlidingWindowRateLimiter::new();
        for i in 0..100 {
            let check = limiter.check_and_record("agent-7", 100).await;
            assert!(check.allowed, "request {} should pass", i);
        }
        // The 101st query within the rolling hour
        let check = limiter.check_and_record("agent-7", 100).await;
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0);
        assert!(check.retry_after.is_some());
        assert_eq!(limiter.current_count("agent-7").await, 100);
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let limiter = SlidingWindowRateLimiter::new();
        let check = limiter.check_and_record("a", 3).await;
        assert_eq!(check.remaining, 2);
        let check = limiter.check_and_record("a", 3).await;
        assert_eq!(check.remaining, 1);
        let check = limiter.check_and_record("a", 3).await;
        assert_eq!(check.remaining, 0);
        assert!(check.allowed);
        let check = limiter.check_and_record("a", 3).await;
        assert!(!check.allowed);
    }

    #[tokio::test]
    async fn test_agents_do_not_share_windows() {
        let limiter = SlidingWindowRateLimiter::new();
        for _ in 0..5 {
            limiter.check_and_record("busy", 5).await;
        }
        assert!(!limiter.check_and_record("busy", 5).await.allowed);
        assert!(limiter.check_and_record("quiet", 5).await.allowed);
    }

    #[tokio::test]
    async fn test_window_slides() {
        // A tiny window so pruning is observable in a test
        let limiter = SlidingWindowRateLimiter::with_window(ChronoDuration::milliseconds(50));
        for _ in 0..3 {
            limiter.check_and_record("a", 3).await;
        }
        assert!(!limiter.check_and_record("a", 3).await.allowed);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check_and_record("a", 3).await.allowed);
    }

    #[tokio::test]
    async fn test_concurrent_requests_respect_quota() {
        let limiter = Arc::new(SlidingWindowRateLimiter::new());
        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.check_and_record("racer", 10).await.allowed
            }));
        }
        let mut passed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                passed += 1;
            }
        }
        assert_eq!(passed, 10);
        assert_eq!(limiter.current_count("racer").await, 10);
    }
}
