//! SQLite checkpoint store.
//!
//! One row per thread, replaced atomically at every stage boundary. Uses
//! SQLx with WAL mode; migrations are embedded and run at init.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use super::state::SessionState;
use crate::error::CheckpointError;

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// A durable snapshot of one thread at a stage boundary.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub thread_id: String,
    /// The stage that just finished, if any stage ran yet.
    pub stage_just_completed: Option<String>,
    /// Stage names the engine would run next; empty means terminal.
    pub next_stages: Vec<String>,
    pub state: SessionState,
}

/// Initialize the SQLite checkpoint database.
///
/// Creates the file and parent directories when missing, configures WAL
/// mode, runs embedded migrations, and returns a pool.
pub async fn init_db(db_path: &str) -> Result<DbPool, CheckpointError> {
    let expanded = expand_tilde(db_path);

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Connection {
            source: sqlx::Error::Configuration(
                format!("failed to create directory {}: {e}", parent.display()).into(),
            ),
        })?;
    }

    let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{expanded}"))
        .map_err(|e| CheckpointError::Connection { source: e })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .idle_timeout(Duration::from_secs(300))
        .connect_with(connect_options)
        .await
        .map_err(|e| CheckpointError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| CheckpointError::Migration { source: e })?;

    Ok(pool)
}

/// Initialize an in-memory SQLite database for testing.
#[cfg(any(test, feature = "test-helpers"))]
pub async fn init_test_db() -> Result<DbPool, CheckpointError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| CheckpointError::Connection { source: e })?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(|e| CheckpointError::Connection { source: e })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| CheckpointError::Migration { source: e })?;

    Ok(pool)
}

/// Durable storage for workflow snapshots, keyed by thread id.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    pool: DbPool,
}

impl CheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert the snapshot for a thread.
    pub async fn save(
        &self,
        thread_id: &str,
        stage_just_completed: Option<&str>,
        next_stages: &[String],
        state: &SessionState,
    ) -> Result<(), CheckpointError> {
        let state_json = serde_json::to_string(state)?;
        let next_json = serde_json::to_string(next_stages)?;

        sqlx::query(
            "INSERT INTO sessions (thread_id, stage_just_completed, next_stages, state, updated_at)
             VALUES (?, ?, ?, ?, datetime('now'))
             ON CONFLICT (thread_id) DO UPDATE SET
                 stage_just_completed = excluded.stage_just_completed,
                 next_stages = excluded.next_stages,
                 state = excluded.state,
                 updated_at = excluded.updated_at",
        )
        .bind(thread_id)
        .bind(stage_just_completed)
        .bind(&next_json)
        .bind(&state_json)
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Query { source: e })?;

        Ok(())
    }

    /// Load the snapshot for a thread, if any.
    pub async fn load(&self, thread_id: &str) -> Result<Option<Snapshot>, CheckpointError> {
        let row: Option<(String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT thread_id, stage_just_completed, next_stages, state
             FROM sessions WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CheckpointError::Query { source: e })?;

        let Some((thread_id, stage_just_completed, next_json, state_json)) = row else {
            return Ok(None);
        };

        Ok(Some(Snapshot {
            thread_id,
            stage_just_completed,
            next_stages: serde_json::from_str(&next_json)?,
            state: serde_json::from_str(&state_json)?,
        }))
    }

    /// List snapshots, most recently updated first.
    pub async fn list(&self, limit: usize) -> Result<Vec<Snapshot>, CheckpointError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(String, Option<String>, String, String)> = sqlx::query_as(
            "SELECT thread_id, stage_just_completed, next_stages, state
             FROM sessions ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CheckpointError::Query { source: e })?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for (thread_id, stage_just_completed, next_json, state_json) in rows {
            snapshots.push(Snapshot {
                thread_id,
                stage_just_completed,
                next_stages: serde_json::from_str(&next_json)?,
                state: serde_json::from_str(&state_json)?,
            });
        }
        Ok(snapshots)
    }
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    path.to_string()
}
