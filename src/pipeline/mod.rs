// Notification pipeline: event source -> classify -> subscription lookup
// -> compose -> push notifier.

pub mod dispatcher;
pub mod fanout;
pub mod tracker;

pub use dispatcher::{Dispatcher, DispatcherState};
pub use tracker::StatsSnapshot;
