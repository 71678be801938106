// Event classification: decides who, if anyone, cares about a commit.
//
// Records on the firehose are untrusted JSON. Each collection is parsed
// into a tolerant shape where every field is optional; anything missing
// the fields we need is dropped quietly at debug level. This is the
// normal case for a fraction of traffic, not an error.
//
// Classification stops short of subscription lookup: it yields the
// candidate targets (already minus the actor) and the context needed to
// compose a notification.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::events::{Collection, CommitEvent};
use crate::identity::{did_from_uri, looks_like_did, normalize_did, same_did};
use crate::notify::InteractionReason;

/// Per-interaction details carried into the notification payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionContext {
    /// The post that was liked/reposted, or the thread the reply belongs to.
    pub subject_uri: Option<String>,
    /// CID of the liked/reposted post.
    pub record_cid: Option<String>,
    /// AT-URI of the reply post itself.
    pub reply_uri: Option<String>,
    /// Reply text, untruncated.
    pub text: Option<String>,
}

/// A commit that should notify one or more actors.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub reason: InteractionReason,
    pub actor_did: String,
    /// Normalized target DIDs, deduplicated, never including the actor.
    pub targets: Vec<String>,
    pub context: InteractionContext,
}

// -- Tolerant record shapes --
//
// Every field goes through `lenient`: a wrong type reads as absent instead
// of failing the whole record, so one bad field never hides the others.

#[derive(Deserialize)]
struct FollowRecord {
    #[serde(default, deserialize_with = "lenient")]
    subject: Option<String>,
}

#[derive(Deserialize, Default)]
struct StrongRef {
    #[serde(default, deserialize_with = "lenient")]
    uri: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    cid: Option<String>,
}

#[derive(Deserialize)]
struct SubjectRecord {
    #[serde(default, deserialize_with = "lenient")]
    subject: Option<StrongRef>,
}

#[derive(Deserialize)]
struct PostRecord {
    #[serde(default, deserialize_with = "lenient")]
    text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    reply: Option<ReplyRef>,
}

#[derive(Deserialize)]
struct ReplyRef {
    #[serde(default, deserialize_with = "lenient")]
    parent: Option<StrongRef>,
    #[serde(default, deserialize_with = "lenient")]
    root: Option<StrongRef>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Classify a commit event. `None` means nothing to notify.
pub fn classify(event: &CommitEvent) -> Option<Interaction> {
    let (reason, candidates, context) = match event.collection {
        Collection::Follow => classify_follow(event)?,
        Collection::Like => classify_subject(event, InteractionReason::Like)?,
        Collection::Repost => classify_subject(event, InteractionReason::Repost)?,
        Collection::Post => classify_reply(event)?,
    };

    let targets = without_actor(&event.actor_did, candidates);
    if targets.is_empty() {
        debug!(
            actor = %event.actor_did,
            collection = %event.collection,
            "No target left after self-suppression"
        );
        return None;
    }

    Some(Interaction {
        reason,
        actor_did: event.actor_did.clone(),
        targets,
        context,
    })
}

type Classified = (InteractionReason, Vec<String>, InteractionContext);

fn parse_record<T: DeserializeOwned>(event: &CommitEvent) -> Option<T> {
    match T::deserialize(&event.record) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(
                actor = %event.actor_did,
                collection = %event.collection,
                error = %e,
                "Malformed record"
            );
            None
        }
    }
}

fn classify_follow(event: &CommitEvent) -> Option<Classified> {
    let record: FollowRecord = parse_record(event)?;
    let subject = record.subject.filter(|s| looks_like_did(s));
    let Some(subject) = subject else {
        debug!(actor = %event.actor_did, "Follow record without a usable subject");
        return None;
    };

    Some((
        InteractionReason::Follow,
        vec![normalize_did(&subject)],
        InteractionContext::default(),
    ))
}

fn classify_subject(event: &CommitEvent, reason: InteractionReason) -> Option<Classified> {
    let record: SubjectRecord = parse_record(event)?;
    let subject = record.subject.unwrap_or_default();

    let Some(target) = did_from_uri(subject.uri.as_deref()) else {
        debug!(
            actor = %event.actor_did,
            reason = %reason,
            "Subject URI missing or unparsable"
        );
        return None;
    };

    Some((
        reason,
        vec![target],
        InteractionContext {
            subject_uri: subject.uri,
            record_cid: subject.cid,
            ..Default::default()
        },
    ))
}

fn classify_reply(event: &CommitEvent) -> Option<Classified> {
    let record: PostRecord = parse_record(event)?;
    // Top-level posts are not interesting here
    let reply = record.reply?;

    let parent_uri = reply.parent.and_then(|p| p.uri);
    let root_uri = reply.root.and_then(|r| r.uri);

    let mut targets = Vec::with_capacity(2);
    for uri in [parent_uri.as_deref(), root_uri.as_deref()] {
        if let Some(did) = did_from_uri(uri) {
            if !targets.contains(&did) {
                targets.push(did);
            }
        }
    }

    if targets.is_empty() {
        debug!(actor = %event.actor_did, "Reply without resolvable parent or root");
        return None;
    }

    Some((
        InteractionReason::Reply,
        targets,
        InteractionContext {
            subject_uri: root_uri.or(parent_uri),
            record_cid: None,
            reply_uri: Some(event.record_uri()),
            text: record.text,
        },
    ))
}

/// Drop the actor from the candidate list: nobody is told about their own action.
fn without_actor(actor_did: &str, candidates: Vec<String>) -> Vec<String> {
    candidates
        .into_iter()
        .filter(|target| !same_did(actor_did, target))
        .collect()
}
