//! Scripted LLM and a session manager harness.
//!
//! `ScriptedLlm` tells the three roles apart by their system prompts and
//! hands each closure the `(key, korean)` pairs parsed from the user prompt.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::json;

use sheetloc::checkpoint::{CheckpointError, CheckpointStore, CheckpointSummary};
use sheetloc::config::SessionSettings;
use sheetloc::model::{CellUpdate, SheetRow, TokenUsage};
use sheetloc::pipeline::PipelineEvent;
use sheetloc::{
    Checkpoint, Completion, EventStream, LlmError, LlmGateway, MemoryCheckpointStore, MemorySheet,
    Pipeline, SessionManager, SessionPhase, SessionSnapshot, SheetClient, SheetError,
};

use super::builders::{pipeline_config, request, session_settings};

/// `(key, korean)` pairs of one request, plus whether it is a retry.
pub type Responder = Box<dyn Fn(&[(String, String)], bool) -> Result<String, LlmError> + Send + Sync>;

pub fn responder(
    f: impl Fn(&[(String, String)], bool) -> Result<String, LlmError> + Send + Sync + 'static,
) -> Responder {
    Box::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Proofread,
    Translate,
    Review,
}

pub struct ScriptedLlm {
    proofread: Responder,
    translate: Responder,
    review: Responder,
    proofread_calls: AtomicUsize,
    translate_calls: AtomicUsize,
    review_calls: AtomicUsize,
}

impl ScriptedLlm {
    /// Proofreading finds nothing, review passes everything and the
    /// translator echoes the Korean text.
    pub fn new() -> Self {
        Self {
            proofread: responder(|_, _| Ok("[]".to_string())),
            translate: responder(|items, _| translations(items, |k| k.to_string())),
            review: responder(|_, _| Ok("[]".to_string())),
            proofread_calls: AtomicUsize::new(0),
            translate_calls: AtomicUsize::new(0),
            review_calls: AtomicUsize::new(0),
        }
    }

    pub fn proofread_with(mut self, f: Responder) -> Self {
        self.proofread = f;
        self
    }

    pub fn translate_with(mut self, f: Responder) -> Self {
        self.translate = f;
        self
    }

    pub fn review_with(mut self, f: Responder) -> Self {
        self.review = f;
        self
    }

    pub fn calls(&self, role: Role) -> usize {
        match role {
            Role::Proofread => self.proofread_calls.load(Ordering::SeqCst),
            Role::Translate => self.translate_calls.load(Ordering::SeqCst),
            Role::Review => self.review_calls.load(Ordering::SeqCst),
        }
    }
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmGateway for ScriptedLlm {
    fn complete(&self, system: &str, user: &str, _timeout: Duration) -> Result<Completion, LlmError> {
        let items = blocks(user);
        let content = if system.contains("Korean proofreader") {
            self.proofread_calls.fetch_add(1, Ordering::SeqCst);
            (self.proofread)(&items, false)
        } else if system.contains("localization translator") {
            self.translate_calls.fetch_add(1, Ordering::SeqCst);
            (self.translate)(&items, user.contains("Previous translation (rejected)"))
        } else {
            self.review_calls.fetch_add(1, Ordering::SeqCst);
            (self.review)(&items, false)
        }?;

        Ok(Completion {
            content,
            usage: TokenUsage::new(100, 50),
        })
    }
}

fn blocks(user: &str) -> Vec<(String, String)> {
    user.split("\n\n---\n\n")
        .filter_map(|block| {
            let mut key = None;
            let mut korean = None;
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("Key: ") {
                    key = Some(v.to_string());
                } else if let Some(v) = line.strip_prefix("Korean: ") {
                    korean = Some(v.to_string());
                }
            }
            Some((key?, korean?))
        })
        .collect()
}

/// Translator reply mapping every Korean source through `f`.
pub fn translations(items: &[(String, String)], f: impl Fn(&str) -> String) -> Result<String, LlmError> {
    let replies: Vec<_> = items
        .iter()
        .map(|(key, korean)| json!({"key": key, "translated": f(korean)}))
        .collect();
    Ok(serde_json::to_string(&replies).unwrap())
}

/// Proofreader reply revising the rows for which `f` returns a new text.
pub fn revisions(items: &[(String, String)], f: impl Fn(&str) -> Option<String>) -> Result<String, LlmError> {
    let replies: Vec<_> = items
        .iter()
        .filter_map(|(key, korean)| {
            f(korean).map(|revised| {
                json!({"key": key, "original": korean, "revised": revised, "changes": "fixed"})
            })
        })
        .collect();
    Ok(serde_json::to_string(&replies).unwrap())
}

/// Sheet whose `batch_write` takes `delay`, like a remote sheet backing off.
pub struct SlowSheet {
    inner: Arc<MemorySheet>,
    delay: Duration,
    write_started: (Sender<()>, Receiver<()>),
}

impl SlowSheet {
    pub fn new(inner: Arc<MemorySheet>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            write_started: bounded(4),
        }
    }

    /// Blocks until a write has begun.
    pub fn wait_for_write(&self) {
        self.write_started
            .1
            .recv_timeout(Duration::from_secs(10))
            .expect("No write started");
    }
}

impl SheetClient for SlowSheet {
    fn load_rows(&self, sheet: &str) -> Result<Vec<SheetRow>, SheetError> {
        self.inner.load_rows(sheet)
    }

    fn ensure_status_column(&self, sheet: &str, column: &str) -> Result<(), SheetError> {
        self.inner.ensure_status_column(sheet, column)
    }

    fn batch_write(&self, sheet: &str, updates: &[CellUpdate]) -> Result<(), SheetError> {
        let _ = self.write_started.0.try_send(());
        thread::sleep(self.delay);
        self.inner.batch_write(sheet, updates)
    }

    fn create_backup(&self, sheet: &str, rows: &[SheetRow]) -> Result<Vec<u8>, SheetError> {
        self.inner.create_backup(sheet, rows)
    }
}

/// Checkpoint store whose saves always fail.
pub struct FailingStore;

impl CheckpointStore for FailingStore {
    fn save(&self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        Err(CheckpointError::LockPoisoned)
    }

    fn load(&self, _session_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(None)
    }

    fn delete(&self, _session_id: &str) -> Result<bool, CheckpointError> {
        Ok(false)
    }

    fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        Ok(Vec::new())
    }
}

/// A session manager over one in-memory sheet.
pub struct TestHarness {
    pub manager: SessionManager,
    pub sheet: Arc<MemorySheet>,
    pub llm: Arc<ScriptedLlm>,
    pub store: Arc<dyn CheckpointStore>,
}

impl TestHarness {
    pub fn new(llm: ScriptedLlm, sheet: Arc<MemorySheet>) -> Self {
        Self::with_store(
            llm,
            sheet,
            Arc::new(MemoryCheckpointStore::new()),
            session_settings(10),
        )
    }

    pub fn with_store(
        llm: ScriptedLlm,
        sheet: Arc<MemorySheet>,
        store: Arc<dyn CheckpointStore>,
        settings: SessionSettings,
    ) -> Self {
        let llm = Arc::new(llm);
        let gateway: Arc<dyn LlmGateway> = Arc::clone(&llm) as Arc<dyn LlmGateway>;
        let pipeline = Arc::new(Pipeline::new(Arc::new(pipeline_config()), gateway));
        let manager = SessionManager::new(pipeline, Arc::clone(&store), &settings)
            .expect("Failed to create session manager");

        Self {
            manager,
            sheet,
            llm,
            store,
        }
    }

    pub fn sheet_client(&self) -> Arc<dyn SheetClient> {
        Arc::clone(&self.sheet) as Arc<dyn SheetClient>
    }

    pub fn start(&self, languages: &[&str]) -> String {
        self.manager
            .start(request(languages), self.sheet_client())
            .expect("Failed to start session")
    }

    /// Polls the session until it reaches `phase`.
    pub fn wait_for(&self, id: &str, phase: SessionPhase) -> SessionSnapshot {
        wait_for_phase(&self.manager, id, phase)
    }
}

pub fn wait_for_phase(manager: &SessionManager, id: &str, phase: SessionPhase) -> SessionSnapshot {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = manager.status(id).expect("Session disappeared");
        if snapshot.phase == phase {
            return snapshot;
        }
        if Instant::now() > deadline {
            panic!(
                "Session {} stuck in {} (wanted {}), last error: {:?}",
                id, snapshot.phase, phase, snapshot.last_error
            );
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Reads events until one named `name` arrives and returns everything read.
pub fn read_until(stream: &mut EventStream, name: &str) -> Vec<PipelineEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match stream.next_timeout(Duration::from_millis(50)) {
            Some(PipelineEvent::Ping {}) => continue,
            Some(event) => {
                let done = event.name() == name;
                events.push(event);
                if done {
                    return events;
                }
            }
            None => break,
        }
    }
    panic!(
        "Event '{}' never arrived, got: {:?}",
        name,
        events.iter().map(|e| e.name()).collect::<Vec<_>>()
    );
}

pub fn names(events: &[PipelineEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}
