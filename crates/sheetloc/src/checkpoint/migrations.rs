//! Schema migrations for the checkpoint database.
//!
//! Applied versions are tracked in a `_migrations` table; pending ones run in
//! order, each at most once.

use rusqlite::Connection;

use super::error::CheckpointError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_checkpoints_table",
        sql: "CREATE TABLE IF NOT EXISTS checkpoints (
            session_id TEXT PRIMARY KEY NOT NULL,
            sheet_name TEXT NOT NULL,
            stage TEXT NOT NULL,
            payload TEXT NOT NULL,
            saved_at TEXT NOT NULL
        );",
    },
    Migration {
        version: 2,
        description: "index_checkpoints_saved_at",
        sql: "CREATE INDEX IF NOT EXISTS idx_checkpoints_saved_at ON checkpoints (saved_at);",
    },
];

pub fn run_all(conn: &Connection) -> Result<(), CheckpointError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running checkpoint migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| CheckpointError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(conn: &Connection) -> u32 {
        conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        assert_eq!(applied(&conn), MIGRATIONS.len() as u32);

        conn.execute(
            "INSERT INTO checkpoints (session_id, sheet_name, stage, payload, saved_at)
             VALUES ('s1', 'Sheet1', 'ko_approval', '{}', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(applied(&conn), MIGRATIONS.len() as u32);
    }
}
