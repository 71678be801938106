// Subscription storage: who wants to be notified, and where.
//
// SQLite via rusqlite with the "bundled" feature, so there is no system
// SQLite dependency. The database file lives wherever FIREBELL_DB_PATH
// points (defaults to ./firebell.db). The same database also holds the
// Jetstream cursor checkpoint.

pub mod memory;
pub mod models;
pub mod queries;
pub mod schema;
pub mod sqlite;
pub mod traits;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;

pub use memory::MemoryStore;
pub use models::PushSubscription;
pub use sqlite::SqliteStore;
pub use traits::{Subscriber, SubscriptionStore};

/// Open (or create) the database and run migrations.
pub fn initialize(db_path: &str) -> Result<Arc<SqliteStore>> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {db_path}"))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    // WAL lets the registration side write while the dispatcher reads
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::create_tables(&conn)?;

    Ok(Arc::new(SqliteStore::new(conn)))
}

/// Open an existing database (fails if it doesn't exist yet).
pub fn open(db_path: &str) -> Result<Arc<SqliteStore>> {
    if !Path::new(db_path).exists() {
        anyhow::bail!(
            "Database not found at {}. Run `firebell init` first.",
            db_path
        );
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Bring older databases up to the current schema
    schema::create_tables(&conn)?;

    Ok(Arc::new(SqliteStore::new(conn)))
}
