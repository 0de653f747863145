//! Checkpoint store error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The run state could not be turned into JSON or back.
    #[error("Checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// IO error when creating the data directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Checkpoint store lock poisoned")]
    LockPoisoned,
}
