use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::model::{CostSummary, FailedRow, ProofreadResult, TranslationResult, ValidationOutcome};

use super::state::Stage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalRow {
    pub key: String,
    pub korean: String,
}

/// Events streamed to an observing client.
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PipelineEvent {
    NodeUpdate {
        node: Stage,
        logs: Vec<String>,
    },
    OriginalData {
        rows: Vec<OriginalRow>,
    },
    KoReviewChunk {
        chunk_results: Vec<ProofreadResult>,
        progress: Progress,
    },
    TranslationChunk {
        chunk_results: Vec<TranslationResult>,
        progress: Progress,
    },
    ReviewChunk {
        chunk_results: Vec<ValidationOutcome>,
        progress: Progress,
    },
    Interrupt {},
    KoReviewReady {
        results: Vec<ProofreadResult>,
        count: usize,
        issues: usize,
    },
    FinalReviewReady {
        review_results: Vec<ValidationOutcome>,
        failed_rows: Vec<FailedRow>,
        cost: CostSummary,
    },
    Error {
        message: String,
    },
    Done {
        applied: bool,
        updates_count: usize,
    },
    Ping {},
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::NodeUpdate { .. } => "node_update",
            PipelineEvent::OriginalData { .. } => "original_data",
            PipelineEvent::KoReviewChunk { .. } => "ko_review_chunk",
            PipelineEvent::TranslationChunk { .. } => "translation_chunk",
            PipelineEvent::ReviewChunk { .. } => "review_chunk",
            PipelineEvent::Interrupt {} => "interrupt",
            PipelineEvent::KoReviewReady { .. } => "ko_review_ready",
            PipelineEvent::FinalReviewReady { .. } => "final_review_ready",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::Done { .. } => "done",
            PipelineEvent::Ping {} => "ping",
        }
    }

    /// After `done` or `error` a stream has nothing more to say.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Done { .. } | PipelineEvent::Error { .. })
    }
}

/// Capability handed to every stage for reporting progress.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);

    /// Checked between chunks; a cancelled run stops at the next boundary.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// No-op sink for unit tests and fire-and-forget runs.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Collects every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PipelineEvent>>,
    cancelled: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(PipelineEvent::name).collect()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Running `{done, total}` counter for one stage's chunk events.
pub struct ChunkProgress<'a> {
    sink: &'a dyn EventSink,
    done: usize,
    total: usize,
    language: Option<String>,
    drip: Duration,
}

impl<'a> ChunkProgress<'a> {
    pub fn new(sink: &'a dyn EventSink, done: usize, total: usize, drip: Duration) -> Self {
        Self {
            sink,
            done,
            total,
            language: None,
            drip,
        }
    }

    pub fn set_language(&mut self, language: Option<&str>) {
        self.language = language.map(str::to_string);
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn progress(&self, done: usize) -> Progress {
        Progress {
            done,
            total: self.total,
            language: self.language.clone(),
        }
    }

    /// Emits a chunk's results and advances the counter by `processed`.
    ///
    /// With a drip delay each item goes out as its own event, spaced by the
    /// delay, so a live view fills row by row instead of jumping per chunk.
    pub fn emit<T, F>(&mut self, items: Vec<T>, processed: usize, make: F)
    where
        F: Fn(Vec<T>, Progress) -> PipelineEvent,
    {
        let processed = processed.max(items.len());
        let end = self.done + processed;

        if self.drip.is_zero() || items.len() <= 1 {
            self.done = end;
            self.sink.emit(make(items, self.progress(end)));
            return;
        }

        let base = end - items.len();
        let count = items.len();
        for (i, item) in items.into_iter().enumerate() {
            self.sink.emit(make(vec![item], self.progress(base + i + 1)));
            if i + 1 < count {
                std::thread::sleep(self.drip);
            }
        }
        self.done = end;
    }

    /// Emits a results-free progress signal at the current count.
    pub fn emit_status<T, F>(&self, make: F)
    where
        F: Fn(Vec<T>, Progress) -> PipelineEvent,
    {
        self.sink.emit(make(Vec::new(), self.progress(self.done)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review_event(items: Vec<ValidationOutcome>, progress: Progress) -> PipelineEvent {
        PipelineEvent::ReviewChunk {
            chunk_results: items,
            progress,
        }
    }

    fn outcome(key: &str) -> ValidationOutcome {
        ValidationOutcome {
            key: key.to_string(),
            language: "en".to_string(),
            source_text: String::new(),
            translated_text: String::new(),
            old_translation: String::new(),
            tag_valid: true,
            tag_errors: vec![],
            glossary_compliant: true,
            glossary_violations: vec![],
            ai_issues: vec![],
            reason: String::new(),
        }
    }

    fn done_counts(sink: &RecordingSink) -> Vec<usize> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::ReviewChunk { progress, .. } => Some(progress.done),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_wire_format() {
        let event = PipelineEvent::Error {
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({"event": "error", "data": {"message": "boom"}}));

        let json = serde_json::to_value(PipelineEvent::Interrupt {}).unwrap();
        assert_eq!(json, serde_json::json!({"event": "interrupt", "data": {}}));
    }

    #[test]
    fn test_node_update_uses_stage_name() {
        let event = PipelineEvent::NodeUpdate {
            node: Stage::ValidateReview,
            logs: vec!["x".to_string()],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_update");
        assert_eq!(json["data"]["node"], "validate_review");
    }

    #[test]
    fn test_chunk_progress_without_drip() {
        let sink = RecordingSink::new();
        let mut progress = ChunkProgress::new(&sink, 0, 3, Duration::ZERO);
        progress.emit(vec![outcome("A"), outcome("B")], 2, review_event);
        progress.emit(vec![outcome("C")], 1, review_event);

        assert_eq!(done_counts(&sink), vec![2, 3]);
    }

    #[test]
    fn test_chunk_progress_drips_per_item() {
        let sink = RecordingSink::new();
        let mut progress = ChunkProgress::new(&sink, 1, 5, Duration::from_millis(1));
        progress.emit(vec![outcome("A"), outcome("B"), outcome("C")], 4, review_event);

        assert_eq!(done_counts(&sink), vec![3, 4, 5]);
        assert_eq!(progress.done(), 5);
    }

    #[test]
    fn test_emit_status_keeps_count() {
        let sink = RecordingSink::new();
        let progress = ChunkProgress::new(&sink, 2, 4, Duration::ZERO);
        progress.emit_status(review_event);
        assert_eq!(done_counts(&sink), vec![2]);
    }

    #[test]
    fn test_recording_sink_cancel() {
        let sink = RecordingSink::new();
        assert!(!sink.is_cancelled());
        sink.cancel();
        assert!(sink.is_cancelled());
    }
}
