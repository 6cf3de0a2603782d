//! Ledger database bootstrap
//!
//! The authoritative economy state lives in SQLite behind an async pool
//! sized to the worker count.  Every mutation happens inside a single
//! transaction; the tables below are the durable source of truth for the
//! cached counters in [`crate::server::economy`].

use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Open (creating if necessary) the ledger database and bootstrap its
/// schema.
///
/// `database` is either a filename or a full `sqlite:` URL; tests use
/// `sqlite::memory:` with a single connection.
pub async fn open_pool(database: &str, max_connections: u32) -> Result<SqlitePool> {
    let mut options = if database.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database)?
    } else {
        SqliteConnectOptions::new().filename(database)
    }
    .create_if_missing(true)
    .busy_timeout(Duration::from_secs(5));

    if !database.contains(":memory:") {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    upgrade_db(&pool).await?;
    Ok(pool)
}

/// Create any missing tables.
pub async fn upgrade_db(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mining_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            received INTEGER NOT NULL,
            preimage TEXT UNIQUE NOT NULL,
            difficulty INTEGER NOT NULL,
            next_difficulty INTEGER NOT NULL,
            aggregate_work REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS replacements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            received INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS replacement_inputs (
            replacement_id INTEGER NOT NULL REFERENCES replacements(id),
            hash BLOB NOT NULL,
            amount INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS replacement_outputs (
            replacement_id INTEGER NOT NULL REFERENCES replacements(id),
            hash BLOB NOT NULL,
            amount INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unspent_outputs (
            hash BLOB PRIMARY KEY NOT NULL,
            amount INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spent_hashes (
            hash BLOB PRIMARY KEY NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete all ledger rows.  Test support.
pub async fn reset_db(pool: &SqlitePool) -> Result<()> {
    for table in [
        "replacement_inputs",
        "replacement_outputs",
        "replacements",
        "mining_reports",
        "unspent_outputs",
        "spent_hashes",
        "meta",
    ] {
        sqlx::query(&format!("DELETE FROM {table}")).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_pool() {
        let pool = open_pool("sqlite::memory:", 1).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mining_reports")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_upgrade_is_idempotent() {
        let pool = open_pool("sqlite::memory:", 1).await.unwrap();
        upgrade_db(&pool).await.unwrap();
        upgrade_db(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_db_clears_rows() {
        let pool = open_pool("sqlite::memory:", 1).await.unwrap();
        sqlx::query("INSERT INTO unspent_outputs (hash, amount) VALUES (?1, ?2)")
            .bind(vec![1u8; 32])
            .bind(100i64)
            .execute(&pool)
            .await
            .unwrap();
        reset_db(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM unspent_outputs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
