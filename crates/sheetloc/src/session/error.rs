use thiserror::Error;

use super::SessionPhase;
use crate::checkpoint::CheckpointError;
use crate::error::{SheetError, WorkerError};
use crate::pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid decision '{0}': expected 'approved' or 'rejected'")]
    InvalidDecision(String),

    #[error("Session {session_id} is not waiting for a decision (phase: {phase})")]
    NotAwaitingDecision {
        session_id: String,
        phase: SessionPhase,
    },

    #[error("Session {session_id} cannot be cancelled (phase: {phase})")]
    NotCancellable {
        session_id: String,
        phase: SessionPhase,
    },

    #[error("All {0} session slots hold running sessions")]
    CapacityExhausted(usize),

    #[error("No checkpoint stored for session {0}")]
    NoCheckpoint(String),

    #[error("Session state lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}
