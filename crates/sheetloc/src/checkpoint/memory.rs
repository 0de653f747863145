use std::collections::HashMap;
use std::sync::Mutex;

use super::{Checkpoint, CheckpointError, CheckpointStore, CheckpointSummary};

/// Process-local store. Checkpoints are kept as JSON text, the same form the
/// SQLite store writes, so anything that saves here would also survive a restart.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let payload = serde_json::to_string(checkpoint)?;
        let mut entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        entries.insert(checkpoint.session_id.clone(), payload);
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        entries
            .get(session_id)
            .map(|payload| serde_json::from_str(payload))
            .transpose()
            .map_err(CheckpointError::from)
    }

    fn delete(&self, session_id: &str) -> Result<bool, CheckpointError> {
        let mut entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        Ok(entries.remove(session_id).is_some())
    }

    fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let entries = self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        let mut summaries = entries
            .values()
            .map(|payload| serde_json::from_str::<Checkpoint>(payload).map(|c| CheckpointSummary::from(&c)))
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(summaries)
    }
}
