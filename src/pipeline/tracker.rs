// Delivery bookkeeping: throughput counters and an in-flight task count.
//
// Delivery tasks are fire-and-forget. Nothing here joins or cancels them;
// the tracker only counts, so shutdown code and tests can wait until the
// outstanding sends have settled.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Running totals since the dispatcher was created.
#[derive(Debug, Default)]
pub struct DispatchStats {
    events_received: AtomicU64,
    events_matched: AtomicU64,
    notifications_dispatched: AtomicU64,
    deliveries_succeeded: AtomicU64,
    deliveries_failed: AtomicU64,
}

/// Point-in-time copy of `DispatchStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_received: u64,
    /// Events that resolved to at least one candidate target.
    pub events_matched: u64,
    /// Delivery tasks spawned.
    pub notifications_dispatched: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
}

impl DispatchStats {
    pub(crate) fn record_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_matched(&self) {
        self.events_matched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self, ok: bool) {
        let counter = if ok {
            &self.deliveries_succeeded
        } else {
            &self.deliveries_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_matched: self.events_matched.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
        }
    }
}

/// Counts delivery tasks that have been spawned but not yet finished.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    in_flight: AtomicUsize,
    idle: Notify,
}

impl DeliveryTracker {
    /// Mark a delivery as started. The count drops when the guard does,
    /// including when the task panics.
    pub fn begin(self: &Arc<Self>) -> DeliveryGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        DeliveryGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no deliveries are in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a wakeup between the
            // check and the await is not lost
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

pub struct DeliveryGuard {
    tracker: Arc<DeliveryTracker>,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.tracker.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}
