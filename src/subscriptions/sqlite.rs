// SqliteStore: rusqlite backend for subscriptions and the stream cursor.
//
// The Connection lives behind a tokio Mutex because it is !Sync. Each
// method locks, does its synchronous rusqlite work, and returns; the guard
// is never held across an .await.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::PushSubscription;
use super::queries;
use super::traits::SubscriptionStore;
use crate::events::CursorCheckpoint;

/// stream_state key holding the Jetstream `time_us` cursor.
pub const CURSOR_KEY: &str = "jetstream_cursor";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    // --- Registration side ---

    pub async fn register(&self, did: &str, push_token: &str, platform: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_subscription(&conn, did, push_token, platform)
    }

    pub async fn unregister(&self, did: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::delete_subscription(&conn, did)
    }

    pub async fn list(&self) -> Result<Vec<PushSubscription>> {
        let conn = self.conn.lock().await;
        queries::list_subscriptions(&conn)
    }

    pub async fn count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::count_subscriptions(&conn)
    }
}

#[async_trait]
impl SubscriptionStore<PushSubscription> for SqliteStore {
    async fn get(&self, did: Option<&str>) -> Result<Option<PushSubscription>> {
        let Some(did) = did else {
            return Ok(None);
        };
        let conn = self.conn.lock().await;
        queries::get_subscription(&conn, did)
    }
}

#[async_trait]
impl CursorCheckpoint for SqliteStore {
    async fn load_cursor(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        let Some(value) = queries::get_stream_state(&conn, CURSOR_KEY)? else {
            return Ok(None);
        };
        let cursor = value
            .parse::<i64>()
            .with_context(|| format!("Stored cursor is not a number: {value}"))?;
        Ok(Some(cursor))
    }

    async fn save_cursor(&self, cursor: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::set_stream_state(&conn, CURSOR_KEY, &cursor.to_string())
    }
}
