// Notifications: composing messages and handing them to a delivery sink.
//
// `compose` is pure. `PushNotifier` is the swap point for delivery:
// GatewayNotifier talks to a real push gateway, LogNotifier just logs.

pub mod compose;
pub mod gateway;
pub mod log;
pub mod message;
pub mod traits;

pub use message::{InteractionReason, NotificationData, NotificationMessage};
pub use traits::PushNotifier;
