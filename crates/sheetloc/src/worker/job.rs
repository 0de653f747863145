use chrono::{DateTime, Utc};
use std::fmt;

use crate::model::Decision;

/// What a queued job asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Runs stages from wherever the run stands until it parks or finishes.
    /// Used for the initial phase and for restored mid-run checkpoints.
    Advance,
    /// Continue from a suspend point with the recorded decision.
    Resume(Decision),
    /// Fresh run after a cancel, seeded with the cached proofreading.
    Restart,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Advance => write!(f, "advance"),
            JobKind::Resume(decision) => write!(f, "resume({})", decision),
            JobKind::Restart => write!(f, "restart"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionJob {
    pub session_id: String,
    /// Session epoch at queue time. A worker drops the job if the session
    /// has moved on since.
    pub epoch: u64,
    pub kind: JobKind,
    pub queued_at: DateTime<Utc>,
}

impl SessionJob {
    pub fn new(session_id: impl Into<String>, epoch: u64, kind: JobKind) -> Self {
        Self {
            session_id: session_id.into(),
            epoch,
            kind,
            queued_at: Utc::now(),
        }
    }

    /// Time spent in the queue so far.
    pub fn waited(&self) -> chrono::Duration {
        Utc::now() - self.queued_at
    }
}
