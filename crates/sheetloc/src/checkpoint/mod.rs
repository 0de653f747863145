//! Durable run state, keyed by session id.
//!
//! A checkpoint is written every time a run parks at a suspend point, so a
//! decision can arrive after a process restart. Checkpoints are removed when
//! the run reaches a terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::{ProofreadResult, TokenUsage};
use crate::pipeline::{RunRequest, RunState, Stage};

pub mod error;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use error::CheckpointError;
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

/// Proofreading output kept aside so a cancelled run can restart without
/// paying for it again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProofreadCache {
    pub results: Vec<ProofreadResult>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub request: RunRequest,
    pub run: RunState,
    #[serde(default)]
    pub proofread_cache: Option<ProofreadCache>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        session_id: impl Into<String>,
        request: RunRequest,
        run: RunState,
        proofread_cache: Option<ProofreadCache>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            request,
            run,
            proofread_cache,
            saved_at: Utc::now(),
        }
    }
}

/// Listing entry; the full run state is only read by [`CheckpointStore::load`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub session_id: String,
    pub sheet_name: String,
    pub stage: Stage,
    pub saved_at: DateTime<Utc>,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(checkpoint: &Checkpoint) -> Self {
        Self {
            session_id: checkpoint.session_id.clone(),
            sheet_name: checkpoint.request.sheet_name.clone(),
            stage: checkpoint.run.stage,
            saved_at: checkpoint.saved_at,
        }
    }
}

pub trait CheckpointStore: Send + Sync {
    /// Inserts or replaces the checkpoint for its session.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Returns whether a checkpoint existed.
    fn delete(&self, session_id: &str) -> Result<bool, CheckpointError>;

    /// Newest first.
    fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError>;
}

/// Returns the canonical checkpoint path: `~/.sheetloc/data/checkpoints.db`.
pub fn default_checkpoint_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".sheetloc").join("data").join("checkpoints.db"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_checkpoint_path() {
        let path = default_checkpoint_path().unwrap();
        assert!(path.ends_with("checkpoints.db"));
        assert!(path.to_string_lossy().contains(".sheetloc"));
    }

    #[test]
    fn test_summary_from_checkpoint() {
        let checkpoint = test_support::checkpoint("s1", Stage::FinalApproval);
        let summary = CheckpointSummary::from(&checkpoint);
        assert_eq!(summary.session_id, "s1");
        assert_eq!(summary.sheet_name, "Sheet1");
        assert_eq!(summary.stage, Stage::FinalApproval);
    }
}
