//! Wall-clock budget for one invocation.
//!
//! The hosting environment kills the process after a fixed number of
//! seconds. The scheduler does not preempt anything: it answers "may I start
//! another unit of work?" and the coordinator asks before every page and
//! before the text-extraction step. A page already in flight always runs to
//! completion (or until the host kills it).
//!
//! Built on `tokio::time::Instant` so tests can drive it with
//! `tokio::time::pause()` / `advance()`.

use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Advisory deadline with a safety margin.
#[derive(Debug, Clone, Copy)]
pub struct BudgetScheduler {
    started: Instant,
    deadline: Instant,
    margin: Duration,
}

impl BudgetScheduler {
    /// Budget of `timeout` starting now; exhausted once less than `margin` remains.
    pub fn new(timeout: Duration, margin: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + timeout,
            margin,
        }
    }

    /// Budget ending at an absolute deadline.
    pub fn with_deadline(deadline: Instant, margin: Duration) -> Self {
        Self {
            started: Instant::now(),
            deadline,
            margin,
        }
    }

    /// Time left before the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Time left that work may actually use: `remaining - margin`.
    pub fn usable(&self) -> Duration {
        self.remaining().saturating_sub(self.margin)
    }

    /// `true` once less than the safety margin is left.
    pub fn is_exhausted(&self) -> bool {
        let remaining = self.remaining();
        if remaining < self.margin {
            warn!(
                "Budget exhausted: {}ms remaining (margin {}ms)",
                remaining.as_millis(),
                self.margin.as_millis()
            );
            return true;
        }
        false
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn exhausts_when_margin_reached() {
        let budget = BudgetScheduler::new(Duration::from_secs(10), Duration::from_secs(3));
        assert!(!budget.is_exhausted());
        assert_eq!(budget.usable(), Duration::from_secs(7));

        tokio::time::advance(Duration::from_millis(6_999)).await;
        assert!(!budget.is_exhausted());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(budget.is_exhausted());
        assert_eq!(budget.usable(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_saturates_after_deadline() {
        let budget = BudgetScheduler::new(Duration::from_secs(1), Duration::ZERO);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(budget.remaining(), Duration::ZERO);
        assert!(budget.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn margin_larger_than_timeout_is_exhausted_immediately() {
        let budget = BudgetScheduler::new(Duration::from_secs(2), Duration::from_secs(3));
        assert!(budget.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_deadline() {
        let deadline = Instant::now() + Duration::from_secs(4);
        let budget = BudgetScheduler::with_deadline(deadline, Duration::from_secs(1));
        assert_eq!(budget.deadline(), deadline);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!budget.is_exhausted());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(budget.is_exhausted());
    }
}
