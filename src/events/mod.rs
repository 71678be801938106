// Event sources: where commit events come from.
//
// `source` defines the port the dispatcher depends on. `jetstream` is the
// live WebSocket implementation and `replay` feeds recorded frames.

pub mod jetstream;
pub mod model;
pub mod replay;
pub mod source;

pub use model::{Collection, CommitEvent};
pub use source::{CommitHandler, CursorCheckpoint, EventSource, StreamObserver};
