//! Single-flight guard shared by the sweep engines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct FlightState {
    running: AtomicBool,
    idle: Notify,
}

/// At most one holder at a time; contenders are turned away, not queued.
#[derive(Clone, Default)]
pub struct SingleFlight {
    state: Arc<FlightState>,
}

/// Held for the duration of a sweep. Dropping it (including when the owning
/// task panics or is aborted) releases the guard.
pub struct FlightPermit {
    state: Arc<FlightState>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        self.state.idle.notify_waiters();
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard, or `None` if a holder already exists.
    pub fn try_acquire(&self) -> Option<FlightPermit> {
        self.state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| FlightPermit {
                state: Arc::clone(&self.state),
            })
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Wait until the guard is free. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.state.idle.notified();
                if !self.is_running() {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
