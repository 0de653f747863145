use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{SessionError, SessionPhase};
use crate::broadcast::EventHub;
use crate::checkpoint::ProofreadCache;
use crate::pipeline::{EventSink, PipelineEvent, RunRequest, RunState};
use crate::sheet::SheetClient;

pub(crate) struct Session {
    pub id: String,
    pub request: RunRequest,
    pub sheet: Arc<dyn SheetClient>,
    pub hub: EventHub,
    epoch: AtomicU64,
    inner: Mutex<SessionInner>,
}

/// Mutable part of a session. Only touched under the session lock; workers
/// copy `run` out, execute without the lock and write the result back.
pub(crate) struct SessionInner {
    pub phase: SessionPhase,
    pub run: RunState,
    pub backup: Vec<u8>,
    pub proofread_cache: Option<ProofreadCache>,
    pub last_error: Option<String>,
    pub applied: Option<bool>,
    pub updates_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: String,
        request: RunRequest,
        sheet: Arc<dyn SheetClient>,
        run: RunState,
        backup: Vec<u8>,
        event_buffer: usize,
    ) -> Self {
        Self {
            id,
            request,
            sheet,
            hub: EventHub::new(event_buffer),
            epoch: AtomicU64::new(0),
            inner: Mutex::new(SessionInner {
                phase: SessionPhase::Running,
                run,
                backup,
                proofread_cache: None,
                last_error: None,
                applied: None,
                updates_count: 0,
                updated_at: Utc::now(),
            }),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidates every job and sink created so far. Returns the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, SessionInner>, SessionError> {
        self.inner.lock().map_err(|_| SessionError::LockPoisoned)
    }

    /// Current phase; a poisoned session reads as failed.
    pub fn phase(&self) -> SessionPhase {
        self.lock().map(|inner| inner.phase).unwrap_or(SessionPhase::Failed)
    }
}

/// Event sink bound to one epoch of a session. Once the session moves on,
/// events are dropped and the pipeline sees the run as cancelled.
pub(crate) struct SessionSink<'a> {
    session: &'a Session,
    epoch: u64,
}

impl<'a> SessionSink<'a> {
    pub fn new(session: &'a Session, epoch: u64) -> Self {
        Self { session, epoch }
    }
}

impl EventSink for SessionSink<'_> {
    fn emit(&self, event: PipelineEvent) {
        if self.is_cancelled() {
            log::debug!(
                "Dropping {} event from superseded run of session {}",
                event.name(),
                self.session.id
            );
            return;
        }
        self.session.hub.publish(event);
    }

    fn is_cancelled(&self) -> bool {
        self.session.epoch() != self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SheetRow;
    use crate::pipeline::PipelineState;
    use crate::sheet::MemorySheet;
    use std::time::Duration;

    fn session() -> Session {
        let request = RunRequest::new("Sheet1", &["en"]);
        let run = RunState::new(PipelineState::new(&request, vec![SheetRow::new()]));
        Session::new("s1".into(), request, Arc::new(MemorySheet::new()), run, Vec::new(), 8)
    }

    #[test]
    fn test_sink_stops_after_epoch_bump() {
        let session = session();
        let mut stream = session.hub.subscribe();
        let sink = SessionSink::new(&session, session.epoch());

        sink.emit(PipelineEvent::Interrupt {});
        assert!(!sink.is_cancelled());
        assert_eq!(
            stream.next_timeout(Duration::from_millis(50)),
            Some(PipelineEvent::Interrupt {})
        );

        assert_eq!(session.bump_epoch(), 1);
        assert!(sink.is_cancelled());
        sink.emit(PipelineEvent::Interrupt {});
        assert_eq!(session.hub.pending(), 0);
    }

    #[test]
    fn test_new_session_is_running() {
        let session = session();
        assert_eq!(session.phase(), SessionPhase::Running);
        assert_eq!(session.epoch(), 0);
        assert!(session.lock().unwrap().proofread_cache.is_none());
    }
}
