// Commit events: the unit delivered by an event source.
//
// Records arrive untyped from the network, so `record` stays a raw JSON
// value here. The classifier decides what shape it needs per collection.

use serde::{Deserialize, Serialize};

/// The record collections the dispatcher listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Follow,
    Like,
    Repost,
    Post,
}

impl Collection {
    /// Every collection the dispatcher registers a handler for.
    pub const ALL: [Collection; 4] = [
        Collection::Follow,
        Collection::Like,
        Collection::Repost,
        Collection::Post,
    ];

    /// The AT Protocol NSID for this collection.
    pub fn nsid(&self) -> &'static str {
        match self {
            Collection::Follow => "app.bsky.graph.follow",
            Collection::Like => "app.bsky.feed.like",
            Collection::Repost => "app.bsky.feed.repost",
            Collection::Post => "app.bsky.feed.post",
        }
    }

    /// Map an NSID back to a collection. Unknown NSIDs yield `None`.
    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.nsid() == nsid)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.nsid())
    }
}

/// A record-creation event from the firehose.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    /// Who performed the action.
    pub actor_did: String,
    pub collection: Collection,
    pub record_key: String,
    /// CID of the created record, when the source provides it.
    pub cid: Option<String>,
    pub record: serde_json::Value,
    /// Stream position (Jetstream `time_us`), when known.
    pub time_us: Option<i64>,
}

impl CommitEvent {
    /// AT-URI of the record this event created.
    pub fn record_uri(&self) -> String {
        crate::identity::record_uri(&self.actor_did, self.collection.nsid(), &self.record_key)
    }
}
