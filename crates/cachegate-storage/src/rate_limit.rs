//! Fixed-window request limiter
//!
//! Callers over the cap wait for the next window instead of failing, so
//! throttling only ever adds latency.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct WindowState {
    started: Instant,
    used: u32,
}

/// Admits at most `max_requests` per `window`.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(WindowState {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Wait until the current window has room, then take a slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.started);
                if elapsed >= self.window {
                    state.started = now;
                    state.used = 0;
                }
                if state.used < self.max_requests {
                    state.used += 1;
                    return;
                }
                self.window.saturating_sub(elapsed)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
