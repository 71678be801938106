// Database queries: all SQL for subscriptions and stream state.
//
// Every DID is normalized on the way in, so lookups are insensitive to
// upstream casing and whitespace.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::PushSubscription;
use crate::identity::normalize_did;

const SUBSCRIPTION_COLUMNS: &str = "did, push_token, platform, created_at, updated_at";

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<PushSubscription> {
    Ok(PushSubscription {
        did: row.get(0)?,
        push_token: row.get(1)?,
        platform: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

// --- Subscriptions ---

/// Register (or refresh) a subscription.
pub fn upsert_subscription(
    conn: &Connection,
    did: &str,
    push_token: &str,
    platform: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO subscriptions (did, push_token, platform, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(did) DO UPDATE SET
            push_token = ?2,
            platform = ?3,
            updated_at = datetime('now')",
        params![normalize_did(did), push_token, platform],
    )?;
    Ok(())
}

pub fn get_subscription(conn: &Connection, did: &str) -> Result<Option<PushSubscription>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE did = ?1"
    ))?;
    let result = stmt
        .query_row(params![normalize_did(did)], row_to_subscription)
        .optional()?;
    Ok(result)
}

/// Remove a subscription. Returns whether anything was deleted.
pub fn delete_subscription(conn: &Connection, did: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM subscriptions WHERE did = ?1",
        params![normalize_did(did)],
    )?;
    Ok(deleted > 0)
}

/// All subscriptions, most recently updated first.
pub fn list_subscriptions(conn: &Connection) -> Result<Vec<PushSubscription>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY updated_at DESC, did"
    ))?;
    let rows = stmt
        .query_map([], row_to_subscription)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_subscriptions(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))?;
    Ok(count)
}

// --- Stream state ---

/// Get a stream state value by key (e.g. "jetstream_cursor").
pub fn get_stream_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM stream_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Set a stream state value (upsert).
pub fn set_stream_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO stream_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}
