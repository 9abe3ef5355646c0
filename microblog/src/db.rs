use crate::error::ApiError;
use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{types::Type, Connection, Row};
use std::{path::Path, time::Duration};
use uuid::Uuid;

pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the SQLite database and run migrations.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Build a connection pool over the database file, migrating it first.
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    init_db(path).with_context(|| format!("failed to open database {}", path.display()))?;
    let manager =
        SqliteConnectionManager::file(path).with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
    let pool = Pool::new(manager)?;
    Ok(pool)
}

/// Run a blocking store operation on a pooled connection off the async runtime.
pub async fn run<T, F>(pool: &DbPool, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, ApiError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut *conn)
    })
    .await
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("store task failed: {e}")))?
}

pub(crate) fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => uuid_col(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Id sequences (favorites, likes) are stored as JSON arrays.
pub(crate) fn ids_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<Uuid>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ids_json(ids: &[Uuid]) -> Result<String, ApiError> {
    serde_json::to_string(ids).map_err(|e| ApiError::Internal(e.into()))
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  name TEXT,
  surname TEXT,
  email TEXT NOT NULL UNIQUE COLLATE NOCASE,
  password_hash TEXT NOT NULL,
  favorites TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS tweets (
  id TEXT PRIMARY KEY,
  author_id TEXT NOT NULL,
  text TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  parent_id TEXT,
  likes TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS tweets_author ON tweets(author_id);
CREATE INDEX IF NOT EXISTS tweets_parent ON tweets(parent_id);
"#;
