use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use log::{debug, error, info, warn};
use lru::LruCache;
use tracing::info_span;
use uuid::Uuid;

use super::record::{Session, SessionInner, SessionSink};
use super::{SessionError, SessionPhase, SessionSnapshot};
use crate::broadcast::EventStream;
use crate::checkpoint::{
    Checkpoint, CheckpointStore, CheckpointSummary, MemoryCheckpointStore, ProofreadCache,
    SqliteCheckpointStore,
};
use crate::config::{AppConfig, SessionSettings};
use crate::llm::LlmGateway;
use crate::model::{CellUpdate, Decision};
use crate::pipeline::{
    EventSink, Pipeline, PipelineConfig, PipelineEvent, PipelineState, RunRequest, RunState, Stage,
};
use crate::sheet::SheetClient;
use crate::worker::{JobKind, SessionJob, WorkerPool};

/// Owns every live session and the workers that drive them.
pub struct SessionManager {
    core: Arc<SessionCore>,
    pool: WorkerPool,
}

/// State shared between the manager's callers and the worker threads.
struct SessionCore {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn CheckpointStore>,
    sessions: Mutex<LruCache<String, Arc<Session>>>,
    event_buffer: usize,
}

impl SessionManager {
    pub fn new(
        pipeline: Arc<Pipeline>,
        store: Arc<dyn CheckpointStore>,
        settings: &SessionSettings,
    ) -> Result<Self, SessionError> {
        let capacity = NonZeroUsize::new(settings.max_sessions).unwrap_or(NonZeroUsize::MIN);
        let core = Arc::new(SessionCore {
            pipeline,
            store,
            sessions: Mutex::new(LruCache::new(capacity)),
            event_buffer: settings.event_buffer,
        });

        let worker_core = Arc::clone(&core);
        let pool = WorkerPool::with_capacity(
            settings.worker_count,
            capacity.get() * 2,
            Arc::new(move |job: SessionJob| worker_core.execute(job)),
        )?;

        info!(
            "Session manager ready ({} slots, {} workers)",
            capacity,
            settings.worker_count.max(1)
        );

        Ok(Self { core, pool })
    }

    /// Wires a manager from application config: checkpoints go to SQLite when
    /// `sessions.checkpoint_path` is set and stay in memory otherwise.
    pub fn from_config(config: &AppConfig, gateway: Arc<dyn LlmGateway>) -> Result<Self, SessionError> {
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(PipelineConfig::from_config(config)),
            gateway,
        ));
        let store: Arc<dyn CheckpointStore> = match &config.sessions.checkpoint_path {
            Some(path) => Arc::new(SqliteCheckpointStore::open(Path::new(path))?),
            None => Arc::new(MemoryCheckpointStore::new()),
        };
        Self::new(pipeline, store, &config.sessions)
    }

    /// Loads the sheet, snapshots a backup and queues the initial phase.
    ///
    /// Everything that can reject the request happens before a session
    /// exists; on success the run is already on the worker queue.
    pub fn start(&self, request: RunRequest, sheet: Arc<dyn SheetClient>) -> Result<String, SessionError> {
        let pipeline = &self.core.pipeline;
        request.validate(pipeline.config())?;

        let rows = sheet.load_rows(&request.sheet_name)?;
        sheet.ensure_status_column(&request.sheet_name, &pipeline.config().columns.status)?;
        let run = pipeline.new_run(&request, rows)?;
        let backup = sheet.create_backup(&request.sheet_name, &run.state.original_rows)?;

        let id = Uuid::new_v4().to_string();
        let row_count = run.state.original_rows.len();
        let session = Arc::new(Session::new(
            id.clone(),
            request,
            sheet,
            run,
            backup,
            self.core.event_buffer,
        ));
        self.core.insert(Arc::clone(&session))?;

        info!(
            "Session created: {} ('{}', {} rows)",
            id, session.request.sheet_name, row_count
        );
        self.queue(&session, session.epoch(), JobKind::Advance)?;
        Ok(id)
    }

    /// Opens the event stream for a session, replacing any previous one.
    pub fn subscribe(&self, id: &str) -> Result<EventStream, SessionError> {
        let session = self.core.get(id)?;
        debug!("Event stream opened for session {} ({})", id, session.phase());
        Ok(session.hub.subscribe())
    }

    /// Delivers the decision for the suspend point the session is parked at.
    ///
    /// The decision text is checked before the session is looked up, so a
    /// bad value never changes anything.
    pub fn resume(&self, id: &str, decision: &str) -> Result<(), SessionError> {
        let decision = decision
            .parse::<Decision>()
            .map_err(|e| SessionError::InvalidDecision(e.0))?;
        let session = self.core.get(id)?;

        let epoch = {
            let mut inner = session.lock()?;
            if !inner.phase.is_awaiting_decision() {
                return Err(SessionError::NotAwaitingDecision {
                    session_id: id.to_string(),
                    phase: inner.phase,
                });
            }
            info!("Session {} {}: {}", id, inner.phase, decision);
            inner.phase = SessionPhase::Running;
            inner.updated_at = Utc::now();
            session.epoch()
        };

        self.queue(&session, epoch, JobKind::Resume(decision))
    }

    /// Abandons the translation phase and goes back to the Korean approval.
    ///
    /// Allowed while translating or while waiting for the final decision.
    /// The current stream ends, anything the abandoned run still produces is
    /// discarded, and a fresh run seeded with the cached proofreading is
    /// queued.
    pub fn cancel(&self, id: &str) -> Result<(), SessionError> {
        let session = self.core.get(id)?;

        let epoch = {
            let mut inner = session.lock()?;
            let translating = inner.phase.is_running() && inner.run.stage != Stage::FinalApproval;
            let cache = match &inner.proofread_cache {
                Some(cache) if translating || inner.phase == SessionPhase::AwaitingFinalApproval => {
                    cache.clone()
                }
                _ => {
                    return Err(SessionError::NotCancellable {
                        session_id: id.to_string(),
                        phase: inner.phase,
                    })
                }
            };

            let epoch = session.bump_epoch();
            session.hub.reset();

            let state = PipelineState::new(&session.request, inner.run.state.original_rows.clone())
                .with_cached_proofreading(cache.results, cache.usage);
            inner.run = RunState::new(state);
            inner.phase = SessionPhase::Running;
            inner.last_error = None;
            inner.updated_at = Utc::now();
            epoch
        };

        info!("Session {} cancelled, restarting from cached proofreading", id);
        self.queue(&session, epoch, JobKind::Restart)
    }

    pub fn status(&self, id: &str) -> Result<SessionSnapshot, SessionError> {
        let session = self.core.get(id)?;
        let inner = session.lock()?;
        Ok(self.core.snapshot(&session, &inner))
    }

    /// Backup bytes taken when the session started.
    pub fn backup(&self, id: &str) -> Result<Vec<u8>, SessionError> {
        let session = self.core.get(id)?;
        let inner = session.lock()?;
        Ok(inner.backup.clone())
    }

    pub fn logs(&self, id: &str) -> Result<Vec<String>, SessionError> {
        let session = self.core.get(id)?;
        let inner = session.lock()?;
        Ok(inner.run.state.logs.clone())
    }

    /// Rebuilds a session from its checkpoint, e.g. after a restart.
    ///
    /// A session that is still live is returned as is. A restored session
    /// parked at a suspend point waits for [`SessionManager::resume`].
    pub fn restore(&self, id: &str, sheet: Arc<dyn SheetClient>) -> Result<SessionSnapshot, SessionError> {
        if self.core.contains(id)? {
            return self.status(id);
        }

        let checkpoint = self
            .core
            .store
            .load(id)?
            .ok_or_else(|| SessionError::NoCheckpoint(id.to_string()))?;
        let Checkpoint {
            session_id,
            request,
            run,
            proofread_cache,
            saved_at,
        } = checkpoint;

        let backup = sheet.create_backup(&request.sheet_name, &run.state.original_rows)?;
        let phase = SessionPhase::of_run(&run);
        let session = Arc::new(Session::new(
            session_id,
            request,
            sheet,
            run,
            backup,
            self.core.event_buffer,
        ));
        {
            let mut inner = session.lock()?;
            inner.phase = phase;
            inner.proofread_cache = proofread_cache;
        }
        self.core.insert(Arc::clone(&session))?;

        info!(
            "Session restored: {} (checkpoint from {}, phase: {})",
            id, saved_at, phase
        );
        if phase.is_running() {
            self.queue(&session, session.epoch(), JobKind::Advance)?;
        }
        self.status(id)
    }

    /// Drops the session and its checkpoint. Returns whether anything existed.
    pub fn delete(&self, id: &str) -> Result<bool, SessionError> {
        let removed = self.core.lock_sessions()?.pop(id);
        let had_checkpoint = self.core.store.delete(id)?;

        if let Some(session) = &removed {
            session.bump_epoch();
            session.hub.close();
            info!("Session deleted: {}", id);
        }
        Ok(removed.is_some() || had_checkpoint)
    }

    /// Checkpoints available for [`SessionManager::restore`], newest first.
    pub fn checkpoints(&self) -> Result<Vec<CheckpointSummary>, SessionError> {
        Ok(self.core.store.list()?)
    }

    pub fn len(&self) -> usize {
        self.core.lock_sessions().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the workers after their current job and waits for them.
    pub fn shutdown(self) {
        self.pool.shutdown();
        self.pool.wait();
    }

    fn queue(&self, session: &Session, epoch: u64, kind: JobKind) -> Result<(), SessionError> {
        let job = SessionJob::new(session.id.clone(), epoch, kind);
        if let Err(e) = self.pool.submit(job) {
            let mut inner = session.lock()?;
            inner.phase = SessionPhase::Failed;
            inner.last_error = Some(e.to_string());
            return Err(e.into());
        }
        debug!(
            "Queued {} job for session {} ({} waiting)",
            kind,
            session.id,
            self.pool.queued()
        );
        Ok(())
    }
}

impl SessionCore {
    fn lock_sessions(&self) -> Result<MutexGuard<'_, LruCache<String, Arc<Session>>>, SessionError> {
        self.sessions.lock().map_err(|_| SessionError::LockPoisoned)
    }

    /// Looks a session up and marks it most recently used.
    fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.lock_sessions()?
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    fn contains(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.lock_sessions()?.contains(id))
    }

    /// Adds a session, evicting the least recently used session that is not
    /// running when the table is full.
    fn insert(&self, session: Arc<Session>) -> Result<(), SessionError> {
        let mut sessions = self.lock_sessions()?;
        let capacity = sessions.cap().get();

        if sessions.len() >= capacity && !sessions.contains(&session.id) {
            let victim = sessions
                .iter()
                .rev()
                .find(|(_, s)| !s.phase().is_running())
                .map(|(id, _)| id.clone())
                .ok_or(SessionError::CapacityExhausted(capacity))?;

            if let Some(evicted) = sessions.pop(&victim) {
                evicted.bump_epoch();
                evicted.hub.close();
                info!(
                    "Session evicted (LRU): {} (phase: {})",
                    victim,
                    evicted.phase()
                );
            }
        }

        sessions.put(session.id.clone(), session);
        debug!("Sessions live: {}/{}", sessions.len(), capacity);
        Ok(())
    }

    fn snapshot(&self, session: &Session, inner: &SessionInner) -> SessionSnapshot {
        let state = &inner.run.state;
        let pending = if inner.phase.is_awaiting_decision() {
            self.pipeline.suspend_payload(&inner.run)
        } else {
            None
        };

        SessionSnapshot {
            session_id: session.id.clone(),
            sheet_name: session.request.sheet_name.clone(),
            phase: inner.phase,
            stage: inner.run.stage,
            total_rows: state.original_rows.len(),
            proofread_count: state.proofreading_results.len(),
            review_count: state.review_results.len(),
            fail_count: state.failed_rows.len(),
            cost: self.pipeline.cost(state),
            logs: state.logs.clone(),
            original_rows: self.pipeline.original_rows(state),
            pending,
            last_error: inner.last_error.clone(),
            applied: inner.applied,
            updates_count: inner.updates_count,
        }
    }

    /// Worker entry point.
    fn execute(&self, job: SessionJob) {
        let session = match self.lock_sessions() {
            Ok(sessions) => sessions.peek(&job.session_id).cloned(),
            Err(e) => {
                error!("Cannot run {} job for session {}: {}", job.kind, job.session_id, e);
                return;
            }
        };
        let Some(session) = session else {
            debug!("Session {} is gone, skipping {} job", job.session_id, job.kind);
            return;
        };
        if session.epoch() != job.epoch {
            debug!("Skipping stale {} job for session {}", job.kind, session.id);
            return;
        }

        let span = info_span!("session", session_id = %session.id, job = %job.kind);
        let _enter = span.enter();

        let mut run = match session.lock() {
            Ok(inner) => inner.run.clone(),
            Err(e) => {
                error!("Session {}: {}", session.id, e);
                return;
            }
        };

        let sink = SessionSink::new(&session, job.epoch);
        let result = match job.kind {
            JobKind::Advance | JobKind::Restart => self.pipeline.advance(&mut run, &sink),
            JobKind::Resume(decision) => self.pipeline.resume(&mut run, decision, &sink),
        };

        let Some(mut inner) = self.relock(&session, &sink) else {
            return;
        };

        if result.is_ok() && run.is_done() {
            // The write may back off for seconds; it runs without the session
            // lock. The stored run stays at the final approval meanwhile, so
            // the session cannot be cancelled or resumed under the write.
            let updates = self.write_set(&run);
            drop(inner);
            let written = match &updates {
                Some(updates) => session.sheet.batch_write(&session.request.sheet_name, updates),
                None => Ok(()),
            };

            let Some(mut inner) = self.relock(&session, &sink) else {
                if updates.is_some() {
                    warn!(
                        "Session {} was dropped while its write set was being applied",
                        session.id
                    );
                }
                return;
            };
            inner.run = run;
            inner.updated_at = Utc::now();
            match written {
                Ok(()) => self.complete(&session, &mut inner, &sink),
                Err(e) => self.fail(&session, &mut inner, &sink, e.to_string()),
            }
            return;
        }

        inner.run = run;
        inner.updated_at = Utc::now();
        match result {
            Ok(()) => self.park(&session, &mut inner, &sink),
            Err(e) => self.fail(&session, &mut inner, &sink, e.to_string()),
        }
    }

    /// Takes the session lock back after work done without it. `None` when
    /// the lock is poisoned or the run was superseded in the meantime.
    fn relock<'s>(&self, session: &'s Session, sink: &SessionSink<'_>) -> Option<MutexGuard<'s, SessionInner>> {
        let inner = match session.lock() {
            Ok(inner) => inner,
            Err(e) => {
                error!("Session {}: {}", session.id, e);
                return None;
            }
        };
        // The epoch only changes under the session lock, so this holds until
        // the guard is released.
        if sink.is_cancelled() {
            debug!("Discarding result of superseded run for session {}", session.id);
            return None;
        }
        Some(inner)
    }

    /// Updates to write for a finished run: the write set when the final
    /// decision approved a non-empty one.
    fn write_set(&self, run: &RunState) -> Option<Vec<CellUpdate>> {
        let approved = run.state.final_decision == Some(Decision::Approved);
        (approved && !run.state.updates.is_empty()).then(|| run.state.updates.clone())
    }

    /// The run stopped at a suspend point: record the phase and checkpoint it.
    fn park(&self, session: &Session, inner: &mut SessionInner, sink: &dyn EventSink) {
        inner.phase = SessionPhase::of_run(&inner.run);
        if !inner.phase.is_awaiting_decision() {
            warn!(
                "Session {} stopped at {} without reaching a suspend point",
                session.id, inner.run.stage
            );
            return;
        }

        if inner.phase == SessionPhase::AwaitingKoApproval && inner.proofread_cache.is_none() {
            inner.proofread_cache = Some(ProofreadCache {
                results: inner.run.state.proofreading_results.clone(),
                usage: inner.run.state.usage,
            });
        }

        let checkpoint = Checkpoint::new(
            session.id.clone(),
            session.request.clone(),
            inner.run.clone(),
            inner.proofread_cache.clone(),
        );
        match self.store.save(&checkpoint) {
            Ok(()) => debug!("Checkpoint saved for session {} at {}", session.id, inner.run.stage),
            Err(e) => {
                // Still resumable in this process, but not after a restart.
                error!("Failed to checkpoint session {}: {}", session.id, e);
                let message = format!("checkpoint not saved at {}: {}", inner.run.stage, e);
                let line = format!("[checkpoint] {}", message);
                inner.run.state.log(line.clone());
                inner.last_error = Some(message);
                sink.emit(PipelineEvent::NodeUpdate {
                    node: inner.run.stage,
                    logs: vec![line],
                });
            }
        }

        info!("Session {} {}", session.id, inner.phase);
    }

    /// The run finished and an approved write set is already on the sheet.
    fn complete(&self, session: &Session, inner: &mut SessionInner, sink: &dyn EventSink) {
        let approved = inner.run.state.final_decision == Some(Decision::Approved);
        let updates_count = if approved { inner.run.state.updates.len() } else { 0 };

        let line = if approved {
            format!(
                "[done] {} cell updates written to '{}'",
                updates_count, session.request.sheet_name
            )
        } else {
            "[done] translations rejected, sheet left unchanged".to_string()
        };
        inner.run.state.log(line);
        inner.phase = SessionPhase::Done;
        inner.applied = Some(approved);
        inner.updates_count = updates_count;
        self.forget_checkpoint(&session.id);

        info!(
            "Session {} done (applied: {}, {} updates)",
            session.id, approved, updates_count
        );
        sink.emit(PipelineEvent::Done {
            applied: approved,
            updates_count,
        });
    }

    fn fail(&self, session: &Session, inner: &mut SessionInner, sink: &dyn EventSink, message: String) {
        error!(
            "Session {} failed at {}: {}",
            session.id, inner.run.stage, message
        );
        inner.run.state.log(format!("[error] {}", message));
        inner.phase = SessionPhase::Failed;
        inner.last_error = Some(message.clone());
        self.forget_checkpoint(&session.id);
        sink.emit(PipelineEvent::Error { message });
    }

    fn forget_checkpoint(&self, id: &str) {
        if let Err(e) = self.store.delete(id) {
            warn!("Failed to delete checkpoint for session {}: {}", id, e);
        }
    }
}
