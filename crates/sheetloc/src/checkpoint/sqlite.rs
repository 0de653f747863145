//! SQLite-backed checkpoint store.
//!
//! One row per session; the run state is stored as a JSON payload next to a
//! few columns used for listing.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{migrations, Checkpoint, CheckpointError, CheckpointStore, CheckpointSummary};
use crate::pipeline::Stage;

/// Thread-safe handle wrapping a single rusqlite connection.
///
/// Cloning shares the connection. WAL mode is enabled for file databases.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) the database at `path` and runs pending migrations.
    pub fn open(path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        migrations::run_all(&conn)?;

        log::info!("Checkpoint store opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, CheckpointError>
    where
        F: FnOnce(&Connection) -> Result<T, CheckpointError>,
    {
        let conn = self.conn.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        f(&conn)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let payload = serde_json::to_string(checkpoint)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkpoints (session_id, sheet_name, stage, payload, saved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id) DO UPDATE SET
                    sheet_name = excluded.sheet_name,
                    stage = excluded.stage,
                    payload = excluded.payload,
                    saved_at = excluded.saved_at",
                params![
                    checkpoint.session_id,
                    checkpoint.request.sheet_name,
                    checkpoint.run.stage.as_str(),
                    payload,
                    checkpoint.saved_at.to_rfc3339(),
                ],
            )?;
            log::debug!(
                "Saved checkpoint for session {} at {}",
                checkpoint.session_id,
                checkpoint.run.stage
            );
            Ok(())
        })
    }

    fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let payload: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT payload FROM checkpoints WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        payload
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .map_err(CheckpointError::from)
    }

    fn delete(&self, session_id: &str) -> Result<bool, CheckpointError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM checkpoints WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(affected > 0)
        })
    }

    fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let rows: Vec<(String, String, String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, sheet_name, stage, saved_at FROM checkpoints ORDER BY saved_at DESC",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(session_id, sheet_name, stage, saved_at)| -> Result<CheckpointSummary, CheckpointError> {
                // Stage names are stored in their serde form.
                let stage: Stage = serde_json::from_value(serde_json::Value::String(stage))?;
                let saved_at = DateTime::parse_from_rfc3339(&saved_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|e| {
                        log::warn!("Bad timestamp on checkpoint {}: {}", session_id, e);
                        DateTime::<Utc>::default()
                    });
                Ok(CheckpointSummary {
                    session_id,
                    sheet_name,
                    stage,
                    saved_at,
                })
            })
            .collect()
    }
}
