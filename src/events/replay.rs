// Replay source: feeds recorded Jetstream frames through the same
// handler contract as the live source.
//
// Used by `firebell replay <file>` to exercise a deployment offline, and
// by the integration tests. `start()` delivers every frame in order and
// only returns once the last handler has finished.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::jetstream::{parse_frame, Frame};
use super::model::{Collection, CommitEvent};
use super::source::{CommitHandler, EventSource, HandlerRegistry, StreamObserver};

pub struct ReplaySource {
    frames: Vec<String>,
    registry: HandlerRegistry,
    closed: AtomicBool,
}

impl ReplaySource {
    /// Replay the given JSON frames, one per entry.
    pub fn from_lines<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self {
            frames: lines.into_iter().map(Into::into).collect(),
            registry: HandlerRegistry::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Replay CommitEvents directly, bypassing frame parsing.
    pub fn from_events(events: Vec<CommitEvent>) -> Self {
        let lines = events.into_iter().map(|event| {
            serde_json::json!({
                "did": event.actor_did,
                "time_us": event.time_us,
                "kind": "commit",
                "commit": {
                    "operation": "create",
                    "collection": event.collection.nsid(),
                    "rkey": event.record_key,
                    "cid": event.cid,
                    "record": event.record,
                }
            })
            .to_string()
        });
        Self::from_lines(lines)
    }

    /// Load newline-delimited frames from a file. Blank lines are ignored.
    pub fn open(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let lines: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        Ok(Self::from_lines(lines))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl EventSource for ReplaySource {
    fn on_create(&self, collection: Collection, handler: Arc<dyn CommitHandler>) {
        self.registry.register(collection, handler);
    }

    fn observe(&self, observer: Arc<dyn StreamObserver>) {
        self.registry.observe(observer);
    }

    async fn start(&self) -> Result<()> {
        self.closed.store(false, Ordering::SeqCst);
        self.registry.signal_open();

        let mut delivered = 0usize;
        let mut skipped = 0usize;
        for (line_no, text) in self.frames.iter().enumerate() {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            match parse_frame(text) {
                Some(Frame::Create(event)) => {
                    self.registry.dispatch(event).await;
                    delivered += 1;
                }
                Some(Frame::Skipped { .. }) => skipped += 1,
                None => {
                    debug!(line = line_no + 1, "Skipping unparsable replay frame");
                    skipped += 1;
                }
            }
        }

        info!(delivered, skipped, "Replay finished");
        self.registry.signal_close();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
