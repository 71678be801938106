// Dispatcher: owns the event source subscription lifecycle.
//
// Two states, Stopped (initial) and Running. `start` registers the four
// collection handlers (once) and opens the source; `stop` closes the
// source. Both are idempotent. Deliveries already spawned when `stop`
// is called are left to finish on their own.
//
// Stream position is not tracked here. Reconnection and cursor handling
// belong to the event source.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::fanout::FanOut;
use super::tracker::{DeliveryTracker, DispatchStats, StatsSnapshot};
use crate::bluesky::handles::ActorLabeler;
use crate::events::{Collection, CommitHandler, EventSource, StreamObserver};
use crate::notify::PushNotifier;
use crate::subscriptions::{Subscriber, SubscriptionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Running,
}

struct Lifecycle {
    state: DispatcherState,
    handlers_registered: bool,
}

pub struct Dispatcher<S: Subscriber> {
    source: Arc<dyn EventSource>,
    fanout: FanOut<S>,
    lifecycle: Mutex<Lifecycle>,
}

impl<S: Subscriber> Dispatcher<S> {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn SubscriptionStore<S>>,
        notifier: Arc<dyn PushNotifier<S>>,
    ) -> Self {
        Self {
            source,
            fanout: FanOut {
                store,
                notifier,
                labeler: None,
                stats: Arc::new(DispatchStats::default()),
                deliveries: Arc::new(DeliveryTracker::default()),
            },
            lifecycle: Mutex::new(Lifecycle {
                state: DispatcherState::Stopped,
                handlers_registered: false,
            }),
        }
    }

    /// Resolve actor DIDs to display labels before composing.
    pub fn with_labeler(mut self, labeler: Arc<dyn ActorLabeler>) -> Self {
        self.fanout.labeler = Some(labeler);
        self
    }

    pub async fn state(&self) -> DispatcherState {
        self.lifecycle.lock().await.state
    }

    /// Stopped -> Running. Calling this while running is a no-op.
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state == DispatcherState::Running {
                warn!("Dispatcher already running, ignoring start");
                return Ok(());
            }

            if !lifecycle.handlers_registered {
                let handler: Arc<dyn CommitHandler> = Arc::new(self.fanout.clone());
                for collection in Collection::ALL {
                    self.source.on_create(collection, handler.clone());
                }
                self.source.observe(Arc::new(ConnectionLog));
                lifecycle.handlers_registered = true;
            }

            lifecycle.state = DispatcherState::Running;
        }

        info!("Dispatcher starting");

        // The lock is released first: a replay source delivers every event
        // from inside start(), and stop() must stay callable meanwhile
        if let Err(e) = self.source.start().await {
            self.lifecycle.lock().await.state = DispatcherState::Stopped;
            return Err(e.context("Failed to start event source"));
        }
        Ok(())
    }

    /// Running -> Stopped. Closes the source; in-flight deliveries continue.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state == DispatcherState::Stopped {
                return Ok(());
            }
            lifecycle.state = DispatcherState::Stopped;
        }

        self.source.close().await?;
        info!(in_flight = self.in_flight(), "Dispatcher stopped");
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.fanout.stats.snapshot()
    }

    /// Delivery tasks spawned but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.fanout.deliveries.in_flight()
    }

    /// Resolve once every spawned delivery has finished.
    pub async fn wait_idle(&self) {
        self.fanout.deliveries.wait_idle().await;
    }
}

/// Logs connection lifecycle signals. Recovery is the source's job.
struct ConnectionLog;

impl StreamObserver for ConnectionLog {
    fn on_open(&self) {
        info!("Event stream connected");
    }

    fn on_close(&self) {
        info!("Event stream closed");
    }

    fn on_error(&self, error: &anyhow::Error, cursor: Option<i64>) {
        warn!(error = %error, cursor = ?cursor, "Event stream error");
    }
}
