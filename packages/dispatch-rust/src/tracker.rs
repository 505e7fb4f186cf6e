//! In-flight fan-out tracking.
//!
//! Every scheduled fan-out holds an [`InFlightGuard`] until its background task
//! finishes, so shutdown can wait for outstanding listener work. The accepting
//! state lives in an `ArcSwap` so readers never take a lock. The last guard to
//! drop wakes any drain waiter.

use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

/// Count of running fan-outs plus the signal raised when it reaches zero.
#[derive(Debug, Default)]
struct InFlight {
    count: AtomicU64,
    idle: Notify,
}

/// Lifecycle of the publish side of a client.
///
/// State machine: Accepting -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// New fan-outs are scheduled.
    Accepting,
    /// Shutdown started; new fan-outs are refused.
    Draining,
    /// Every fan-out scheduled before shutdown has finished.
    Stopped,
}

#[derive(Debug)]
pub struct PublishTracker {
    in_flight: Arc<InFlight>,
    state: ArcSwap<TrackerState>,
}

impl PublishTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(InFlight::default()),
            state: ArcSwap::from_pointee(TrackerState::Accepting),
        }
    }

    #[must_use]
    pub fn state(&self) -> TrackerState {
        **self.state.load()
    }

    /// Registers one fan-out. Returns `None` once shutdown has started.
    #[must_use]
    pub fn begin(&self) -> Option<InFlightGuard> {
        if self.state() != TrackerState::Accepting {
            return None;
        }
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        Some(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Stops accepting new fan-outs.
    pub fn start_draining(&self) {
        self.state.store(Arc::new(TrackerState::Draining));
    }

    /// Waits for in-flight fan-outs, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` if everything drained. Returns
    /// `false` if the timeout expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                // Register interest before reading the count so a guard
                // dropped in between still wakes us.
                let mut woken = pin!(self.in_flight.idle.notified());
                woken.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                woken.await;
            }
        };

        let drained = tokio::time::timeout(timeout, idle).await.is_ok();
        if drained {
            self.state.store(Arc::new(TrackerState::Stopped));
        }
        drained
    }
}

impl Default for PublishTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}
