// Notification composition: turns a classified interaction into the
// title/body/data triple a push gateway understands.
//
// Pure functions only. The actor label is whatever the caller resolved
// (a handle when available, otherwise the DID); `data.actorDid` is always
// the DID.

use super::message::{InteractionReason, NotificationData, NotificationMessage};
use crate::classify::InteractionContext;

/// Reply text longer than this many characters is truncated.
pub const SNIPPET_MAX_CHARS: usize = 120;

const ELLIPSIS: char = '\u{2026}';

/// Truncate reply text for display.
///
/// Counts characters, not bytes, so multi-byte text never splits mid-char.
/// Text of at most `SNIPPET_MAX_CHARS` passes through; longer text keeps
/// the first `SNIPPET_MAX_CHARS - 1` characters plus a single ellipsis.
pub fn truncate_snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_MAX_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(SNIPPET_MAX_CHARS - 1).collect();
    truncated.push(ELLIPSIS);
    truncated
}

/// Build the notification for one interaction.
pub fn compose(
    reason: InteractionReason,
    actor_did: &str,
    actor_label: &str,
    context: &InteractionContext,
) -> NotificationMessage {
    let (title, body) = match reason {
        InteractionReason::Follow => ("New follower", format!("{actor_label} followed you")),
        InteractionReason::Like => ("New like", format!("{actor_label} liked your post")),
        InteractionReason::Repost => ("New repost", format!("{actor_label} reposted your post")),
        InteractionReason::Reply => {
            // Whitespace-only text has nothing worth quoting
            let snippet = context
                .text
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .map(truncate_snippet);
            let body = match snippet {
                Some(snippet) => format!("{actor_label} replied: {snippet}"),
                None => format!("{actor_label} replied to your post"),
            };
            ("New reply", body)
        }
    };

    NotificationMessage {
        title: title.to_string(),
        body,
        data: NotificationData {
            reason,
            actor_did: actor_did.to_string(),
            subject_uri: context.subject_uri.clone(),
            record_cid: context.record_cid.clone(),
            reply_uri: context.reply_uri.clone(),
        },
    }
}
