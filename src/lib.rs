// Firebell: push notifications for Bluesky interactions.
//
// This is the library root. Data flows one way:
//   events (firehose) -> classify -> subscriptions (lookup)
//   -> notify::compose -> notify::PushNotifier
// with `pipeline` wiring the stages together.

pub mod bluesky;
pub mod classify;
pub mod config;
pub mod events;
pub mod identity;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod status;
pub mod subscriptions;
