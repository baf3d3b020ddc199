//! Request rate limiting shared by every worker of a live collector

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter: within any window, at most `limit` permits are
/// handed out.
///
/// Waiters queue on a fair mutex, so permits are granted in request order.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: NonZeroU32, window: Duration) -> Self {
        let limit = limit.get() as usize;
        Self {
            limit,
            window,
            issued: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn per_second(limit: NonZeroU32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    /// Wait until a request may be issued.
    ///
    /// Dropping the returned future gives up the place in line without
    /// consuming a permit.
    pub async fn acquire(&self) {
        let mut issued = self.issued.lock().await;

        loop {
            let now = Instant::now();
            while issued
                .front()
                .is_some_and(|&at| now.duration_since(at) >= self.window)
            {
                issued.pop_front();
            }

            if issued.len() < self.limit {
                issued.push_back(now);
                return;
            }

            if let Some(&oldest) = issued.front() {
                tokio::time::sleep_until(oldest + self.window).await;
            }
        }
    }
}
