//! Sliding-window admission control shared by every translation worker.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    /// Admission instants inside the current window, oldest first
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            admitted: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Wait until a request may be sent, then record it.
    ///
    /// Callers queue on a fair mutex, so waiters are admitted in arrival order and
    /// a waiter never observes a window that someone else is about to fill.
    pub async fn acquire(&self) {
        let mut admitted = self.admitted.lock().await;

        loop {
            let now = Instant::now();
            while admitted.front().is_some_and(|&t| now.duration_since(t) >= self.window) {
                admitted.pop_front();
            }
            if admitted.len() < self.limit {
                admitted.push_back(now);
                return;
            }

            let Some(&oldest) = admitted.front() else {
                continue;
            };
            let ready_at = oldest + self.window;
            debug!(wait_ms = (ready_at - now).as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Admissions recorded in the trailing window.
    pub async fn in_window(&self) -> usize {
        let admitted = self.admitted.lock().await;
        let now = Instant::now();
        admitted.iter().filter(|&&t| now.duration_since(t) < self.window).count()
    }
}
