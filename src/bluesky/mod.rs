// Bluesky public API: only what notification text needs (actor handles).

pub mod client;
pub mod handles;
