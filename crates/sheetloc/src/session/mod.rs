//! Sessions: one pipeline run each, executed on the worker pool and observed
//! through its event stream.
//!
//! The manager keeps a bounded, least-recently-used table of live sessions.
//! Every session owns its run state, its event hub and a monotonically
//! increasing epoch; jobs and event sinks carry the epoch they were created
//! for, so work belonging to a cancelled run can never touch the current one.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::CostSummary;
use crate::pipeline::{OriginalRow, PipelineEvent, RunState, Stage};

pub mod error;
pub mod manager;
mod record;

pub use error::SessionError;
pub use manager::SessionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// A job is queued or executing.
    Running,
    AwaitingKoApproval,
    AwaitingFinalApproval,
    Done,
    Failed,
}

impl SessionPhase {
    /// Phase for a run a worker just parked or finished.
    pub fn of_run(run: &RunState) -> Self {
        match run.stage {
            Stage::KoApproval if run.is_awaiting_decision() => SessionPhase::AwaitingKoApproval,
            Stage::FinalApproval if run.is_awaiting_decision() => SessionPhase::AwaitingFinalApproval,
            Stage::Done => SessionPhase::Done,
            _ => SessionPhase::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Running => "running",
            SessionPhase::AwaitingKoApproval => "awaiting_ko_approval",
            SessionPhase::AwaitingFinalApproval => "awaiting_final_approval",
            SessionPhase::Done => "done",
            SessionPhase::Failed => "failed",
        }
    }

    pub fn is_running(&self) -> bool {
        *self == SessionPhase::Running
    }

    pub fn is_awaiting_decision(&self) -> bool {
        matches!(
            self,
            SessionPhase::AwaitingKoApproval | SessionPhase::AwaitingFinalApproval
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Done | SessionPhase::Failed)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session, enough to rebuild a client screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub sheet_name: String,
    pub phase: SessionPhase,
    pub stage: Stage,
    pub total_rows: usize,
    pub proofread_count: usize,
    pub review_count: usize,
    pub fail_count: usize,
    pub cost: CostSummary,
    pub logs: Vec<String>,
    pub original_rows: Vec<OriginalRow>,
    /// The `*_ready` payload while parked at a suspend point.
    pub pending: Option<PipelineEvent>,
    pub last_error: Option<String>,
    /// Set once the run is done: whether the write set reached the sheet.
    pub applied: Option<bool>,
    pub updates_count: usize,
}
