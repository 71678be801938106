// Event source port: the seam between the dispatcher and the firehose.
//
// Implementors: JetstreamSource (live WebSocket), ReplaySource (recorded
// frames). The dispatcher only registers handlers and calls start/close;
// reconnection and cursor handling belong to the source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::model::{Collection, CommitEvent};

/// Receives record-creation events for the collections it was registered for.
#[async_trait]
pub trait CommitHandler: Send + Sync {
    async fn on_commit(&self, event: CommitEvent);
}

/// Connection lifecycle signals. All methods default to no-ops.
pub trait StreamObserver: Send + Sync {
    fn on_open(&self) {}

    fn on_close(&self) {}

    fn on_error(&self, error: &anyhow::Error, cursor: Option<i64>) {
        let _ = (error, cursor);
    }
}

/// A managed stream of commit events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Register a handler for creations in `collection`.
    fn on_create(&self, collection: Collection, handler: Arc<dyn CommitHandler>);

    /// Register an observer for open/close/error signals.
    fn observe(&self, observer: Arc<dyn StreamObserver>);

    /// Open the connection and begin delivering events.
    async fn start(&self) -> Result<()>;

    /// Close the connection. No events are delivered after this returns.
    async fn close(&self) -> Result<()>;
}

/// Durable storage for a source's stream position (Jetstream `time_us`).
#[async_trait]
pub trait CursorCheckpoint: Send + Sync {
    async fn load_cursor(&self) -> Result<Option<i64>>;

    async fn save_cursor(&self, cursor: i64) -> Result<()>;
}

/// Handler and observer bookkeeping shared by the concrete sources.
///
/// Handlers are cloned out of the lock before being awaited, so a slow
/// handler never holds the registry mutex.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<HashMap<Collection, Vec<Arc<dyn CommitHandler>>>>,
    observers: Mutex<Vec<Arc<dyn StreamObserver>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, collection: Collection, handler: Arc<dyn CommitHandler>) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.entry(collection).or_default().push(handler);
    }

    pub fn observe(&self, observer: Arc<dyn StreamObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.push(observer);
    }

    /// Collections with at least one handler.
    pub fn collections(&self) -> Vec<Collection> {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        Collection::ALL
            .into_iter()
            .filter(|c| handlers.get(c).is_some_and(|h| !h.is_empty()))
            .collect()
    }

    /// Deliver an event to every handler registered for its collection.
    pub async fn dispatch(&self, event: CommitEvent) {
        let targets: Vec<Arc<dyn CommitHandler>> = {
            let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            handlers.get(&event.collection).cloned().unwrap_or_default()
        };

        if targets.is_empty() {
            debug!(collection = %event.collection, "No handler registered, dropping event");
            return;
        }

        for handler in targets {
            handler.on_commit(event.clone()).await;
        }
    }

    pub fn signal_open(&self) {
        for observer in self.snapshot_observers() {
            observer.on_open();
        }
    }

    pub fn signal_close(&self) {
        for observer in self.snapshot_observers() {
            observer.on_close();
        }
    }

    pub fn signal_error(&self, error: &anyhow::Error, cursor: Option<i64>) {
        for observer in self.snapshot_observers() {
            observer.on_error(error, cursor);
        }
    }

    fn snapshot_observers(&self) -> Vec<Arc<dyn StreamObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
