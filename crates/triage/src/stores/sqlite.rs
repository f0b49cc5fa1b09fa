//! SQLite-backed submission log

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use super::{LogRow, LogStore};
use crate::error::StoreError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  caller_id TEXT NOT NULL,
  issue TEXT NOT NULL,
  repository TEXT NOT NULL,
  timestamp TEXT NOT NULL
)";

const INDEX: &str = "CREATE INDEX IF NOT EXISTS logs_caller_time ON logs (caller_id, timestamp)";

type RawRow = (String, String, String, String);

pub struct SqliteLogStore {
  pool: SqlitePool,
}

impl SqliteLogStore {
  /// Connect to `database_url` (e.g. `sqlite://triage.db`), creating the file and schema
  pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

    sqlx::query(SCHEMA).execute(&pool).await?;
    sqlx::query(INDEX).execute(&pool).await?;
    tracing::info!(database_url, "log store ready");

    Ok(Self { pool })
  }
}

// Fixed-width UTC timestamps compare correctly as text
fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
  timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_row((caller_id, issue, repository, timestamp): RawRow) -> Result<LogRow, StoreError> {
  let timestamp = DateTime::parse_from_rfc3339(&timestamp)
    .map_err(|e| StoreError::Decode { message: format!("bad timestamp '{timestamp}': {e}") })?
    .with_timezone(&Utc);
  Ok(LogRow { caller_id, issue, repository, timestamp })
}

#[async_trait]
impl LogStore for SqliteLogStore {
  async fn find_recent_logs(
    &self,
    caller_id: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<LogRow>, StoreError> {
    let rows: Vec<RawRow> = sqlx::query_as(
      "SELECT caller_id, issue, repository, timestamp FROM logs
       WHERE caller_id = ?1 AND timestamp >= ?2 ORDER BY timestamp DESC",
    )
    .bind(caller_id)
    .bind(encode_timestamp(since))
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(decode_row).collect()
  }

  async fn find_exact_issue(
    &self,
    caller_id: &str,
    issue: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<LogRow>, StoreError> {
    let rows: Vec<RawRow> = sqlx::query_as(
      "SELECT caller_id, issue, repository, timestamp FROM logs
       WHERE caller_id = ?1 AND issue = ?2 AND timestamp >= ?3 ORDER BY timestamp DESC",
    )
    .bind(caller_id)
    .bind(issue)
    .bind(encode_timestamp(since))
    .fetch_all(&self.pool)
    .await?;

    rows.into_iter().map(decode_row).collect()
  }

  async fn insert_log(&self, row: &LogRow) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO logs (caller_id, issue, repository, timestamp) VALUES (?1, ?2, ?3, ?4)")
      .bind(&row.caller_id)
      .bind(&row.issue)
      .bind(&row.repository)
      .bind(encode_timestamp(row.timestamp))
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use tempfile::TempDir;

  async fn open_store(dir: &TempDir) -> SqliteLogStore {
    let url = format!("sqlite://{}", dir.path().join("logs.db").display());
    SqliteLogStore::connect(&url).await.unwrap()
  }

  fn row(caller: &str, issue: &str, timestamp: DateTime<Utc>) -> LogRow {
    LogRow {
      caller_id: caller.to_string(),
      issue: issue.to_string(),
      repository: "acme/api".to_string(),
      timestamp,
    }
  }

  #[tokio::test]
  async fn test_recent_logs_respect_window_and_caller() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let now = Utc::now();

    store.insert_log(&row("key-1", "app.py:42", now - Duration::minutes(10))).await.unwrap();
    store.insert_log(&row("key-1", "app.py:42", now - Duration::hours(5))).await.unwrap();
    store.insert_log(&row("key-2", "app.py:42", now)).await.unwrap();

    let recent = store.find_recent_logs("key-1", now - Duration::hours(1)).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].repository, "acme/api");
  }

  #[tokio::test]
  async fn test_exact_issue_lookup() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let now = Utc::now();

    store.insert_log(&row("key-1", "app.py:42", now - Duration::hours(2))).await.unwrap();

    let since = now - Duration::hours(24);
    assert_eq!(store.find_exact_issue("key-1", "app.py:42", since).await.unwrap().len(), 1);
    assert!(store.find_exact_issue("key-1", "app.py:43", since).await.unwrap().is_empty());
    assert!(store.find_exact_issue("key-2", "app.py:42", since).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_rows_survive_reconnect() {
    let dir = TempDir::new().unwrap();
    let now = Utc::now();
    {
      let store = open_store(&dir).await;
      store.insert_log(&row("key-1", "db.py:7", now)).await.unwrap();
    }

    let store = open_store(&dir).await;
    let rows = store.find_recent_logs("key-1", now - Duration::minutes(1)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].issue, "db.py:7");
  }
}
