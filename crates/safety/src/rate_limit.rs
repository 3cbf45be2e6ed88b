//! Sliding-window rate limiter for the execution gateway.
//!
//! Counts admissions over a rolling window. The check-and-record step is
//! one critical section: two concurrent callers can never both observe
//! "under limit" and both take the last slot. Rejections carry the wait
//! until the oldest in-window admission expires.
//!
//! Timestamps use `tokio::time::Instant`, so tests can pause and advance
//! the clock instead of sleeping.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Over the limit; retry after `wait`.
    Rejected { wait: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Sliding-window limiter: at most `max` admissions per `window`.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max: max.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to admit one invocation. Prune, decide, and record under a
    /// single lock so admission is atomic for concurrent callers.
    pub fn try_admit(&self) -> Admission {
        let now = Instant::now();
        let mut stamps = self.timestamps.lock().unwrap();

        while stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            stamps.pop_front();
        }

        if stamps.len() < self.max {
            stamps.push_back(now);
            Admission::Admitted
        } else {
            let wait = stamps
                .front()
                .map(|oldest| (*oldest + self.window).duration_since(now))
                .unwrap_or_default();
            Admission::Rejected { wait }
        }
    }

    /// Admissions currently inside the window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        let mut stamps = self.timestamps.lock().unwrap();
        while stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            stamps.pop_front();
        }
        stamps.len()
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter() -> RateLimiter {
        RateLimiter::new(10, Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn ten_admitted_eleventh_rejected_with_wait() {
        let limiter = limiter();

        for i in 0..10 {
            assert!(limiter.try_admit().is_admitted(), "admission {i} failed");
        }

        match limiter.try_admit() {
            Admission::Rejected { wait } => {
                assert!(wait > Duration::ZERO, "wait hint must be positive");
                assert!(wait <= Duration::from_secs(60));
            }
            Admission::Admitted => panic!("11th invocation must be rejected"),
        }
        assert_eq!(limiter.in_window(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_again_after_window_expires() {
        let limiter = limiter();
        for _ in 0..10 {
            assert!(limiter.try_admit().is_admitted());
        }
        assert!(!limiter.try_admit().is_admitted());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.try_admit().is_admitted());
        assert_eq!(limiter.in_window(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_rather_than_resets() {
        let limiter = limiter();

        for _ in 0..5 {
            limiter.try_admit();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        for _ in 0..5 {
            assert!(limiter.try_admit().is_admitted());
        }

        // Full: the oldest batch is 30s old, so the hint is ~30s
        match limiter.try_admit() {
            Admission::Rejected { wait } => {
                assert_eq!(wait, Duration::from_secs(30));
            }
            Admission::Admitted => panic!("should be full"),
        }

        // After the first batch expires, half the window frees up
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(limiter.in_window(), 5);
        assert!(limiter.try_admit().is_admitted());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_cannot_oversubscribe() {
        let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..25 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.try_admit().is_admitted()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_clamped_to_one() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        assert!(limiter.try_admit().is_admitted());
        assert!(!limiter.try_admit().is_admitted());
    }
}
