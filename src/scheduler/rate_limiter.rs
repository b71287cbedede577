use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Caps outbound calls at `budget` per rolling `window`.
///
/// Keeps the issue instant of every call still inside the window; when the
/// budget is spent, `acquire` sleeps until the oldest call ages out.
#[derive(Debug)]
pub struct RateLimiter {
    budget: usize,
    window: Duration,
    issued: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(budget: usize, window: Duration) -> Self {
        Self {
            budget: budget.max(1),
            window,
            issued: VecDeque::with_capacity(budget.max(1)),
        }
    }

    /// Wait until a call may be issued, then count it.
    pub async fn acquire(&mut self) {
        self.evict(Instant::now());

        if self.issued.len() >= self.budget {
            if let Some(&oldest) = self.issued.front() {
                let resume_at = oldest + self.window;
                info!(
                    budget = self.budget,
                    wait_ms = resume_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Rate budget exhausted, waiting for window to roll"
                );
                tokio::time::sleep_until(resume_at).await;
            }
            self.evict(Instant::now());
        }

        self.issued.push_back(Instant::now());
    }

    /// Calls counted in the current window.
    pub fn in_window(&mut self) -> usize {
        self.evict(Instant::now());
        self.issued.len()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&front) = self.issued.front() {
            if now.duration_since(front) >= self.window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn calls_within_budget_do_not_wait() {
        let mut limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_waits_for_window() {
        let mut limiter = RateLimiter::new(3, WINDOW);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        limiter.acquire().await;
        assert!(start.elapsed() >= WINDOW, "elapsed {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_budget_in_any_rolling_window() {
        let budget = 4;
        let mut limiter = RateLimiter::new(budget, WINDOW);
        let start = Instant::now();
        let mut stamps = Vec::new();

        // Uneven pacing: bursts separated by pauses that straddle window edges.
        for i in 0..20u64 {
            limiter.acquire().await;
            stamps.push(start.elapsed());
            tokio::time::sleep(Duration::from_secs((i * 7) % 23)).await;
        }

        for (i, &t) in stamps.iter().enumerate() {
            let in_window = stamps[i..].iter().filter(|&&s| s < t + WINDOW).count();
            assert!(in_window <= budget, "{in_window} calls in window starting at {t:?}");
        }
    }
}
