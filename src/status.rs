// Status display: subscription count and saved stream position.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::events::CursorCheckpoint;
use crate::subscriptions::SqliteStore;

/// Display system status to the terminal.
pub async fn show(store: &SqliteStore, db_path: &str) -> Result<()> {
    let file_size = std::fs::metadata(db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_path, file_size);

    let count = store.count().await?;
    if count == 0 {
        println!("Subscriptions: {}", "none registered".yellow());
        println!("  Run `firebell register <did> <token>` to add one");
    } else {
        println!("Subscriptions: {}", count.to_string().bold());
        for sub in store.list().await?.iter().take(5) {
            println!(
                "  {} ({}, updated {})",
                sub.did,
                sub.platform,
                sub.updated_at.dimmed()
            );
        }
        if count > 5 {
            println!("  {}", format!("... and {} more", count - 5).dimmed());
        }
    }

    match store.load_cursor().await? {
        Some(cursor) => println!("Stream cursor: {} ({})", cursor, describe_cursor(cursor)),
        None => println!("Stream cursor: {}", "none saved (starts at live edge)".dimmed()),
    }

    Ok(())
}

/// Render a Jetstream `time_us` cursor as a UTC timestamp.
pub fn describe_cursor(time_us: i64) -> String {
    chrono::DateTime::from_timestamp_micros(time_us)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "invalid timestamp".to_string())
}

/// True when the database file exists at `db_path`.
pub fn database_exists(db_path: &str) -> bool {
    Path::new(db_path).exists()
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
