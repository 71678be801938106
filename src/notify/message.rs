// Notification message types: what gets handed to a push notifier.
//
// The serialized shape is the push payload contract:
// { title, body, data: { reason, actorDid, subjectUri?, recordCid?, replyUri? } }

use serde::{Deserialize, Serialize};

/// Why a subscriber is being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionReason {
    Follow,
    Like,
    Repost,
    Reply,
}

impl InteractionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionReason::Follow => "follow",
            InteractionReason::Like => "like",
            InteractionReason::Repost => "repost",
            InteractionReason::Reply => "reply",
        }
    }
}

impl std::fmt::Display for InteractionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured payload delivered alongside the visible text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub reason: InteractionReason,
    pub actor_did: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}
