use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::model::{
    CellUpdate, Decision, FailedRow, ProofreadResult, RetryCounts, RetryItem, SheetRow,
    TokenUsage, TranslationMode, TranslationResult, ValidationOutcome,
};

use super::config::PipelineConfig;
use super::context::RunContext;
use super::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Backup,
    ContextSetup,
    KoProofread,
    KoApproval,
    Translate,
    ValidateReview,
    FinalApproval,
    WriteSetCompute,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Backup => "backup",
            Stage::ContextSetup => "context_setup",
            Stage::KoProofread => "ko_proofread",
            Stage::KoApproval => "ko_approval",
            Stage::Translate => "translate",
            Stage::ValidateReview => "validate_review",
            Stage::FinalApproval => "final_approval",
            Stage::WriteSetCompute => "write_set_compute",
            Stage::Done => "done",
        }
    }

    /// Stages that halt until an external decision arrives.
    pub fn is_suspend_point(&self) -> bool {
        matches!(self, Stage::KoApproval | Stage::FinalApproval)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client asks for when starting a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub sheet_name: String,
    #[serde(default)]
    pub mode: TranslationMode,
    pub target_languages: Vec<String>,
    #[serde(default)]
    pub row_limit: Option<usize>,
    #[serde(default)]
    pub custom_prompt: String,
}

impl RunRequest {
    pub fn new(sheet_name: impl Into<String>, target_languages: &[&str]) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            mode: TranslationMode::Full,
            target_languages: target_languages.iter().map(|l| l.to_string()).collect(),
            row_limit: None,
            custom_prompt: String::new(),
        }
    }

    pub fn validate(&self, config: &PipelineConfig) -> Result<(), PipelineError> {
        if self.sheet_name.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "sheet name must not be empty".to_string(),
            ));
        }

        if self.target_languages.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "at least one target language is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for language in &self.target_languages {
            if config.language_column(language).is_none() {
                return Err(PipelineError::UnsupportedLanguage(language.clone()));
            }
            if !seen.insert(language.as_str()) {
                return Err(PipelineError::InvalidRequest(format!(
                    "language '{}' requested twice",
                    language
                )));
            }
        }

        if self.row_limit == Some(0) {
            return Err(PipelineError::InvalidRequest(
                "row limit must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// The aggregate every stage reads and patches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub sheet_name: String,
    pub mode: TranslationMode,
    pub target_languages: Vec<String>,
    pub custom_prompt: String,

    pub original_rows: Vec<SheetRow>,
    pub backup_rows: Vec<SheetRow>,
    pub proofreading_results: Vec<ProofreadResult>,
    /// Proofreading was seeded from an earlier run; skip the LLM.
    pub proofreading_cached: bool,
    pub translation_results: Vec<TranslationResult>,
    pub review_results: Vec<ValidationOutcome>,
    pub failed_rows: Vec<FailedRow>,
    pub needs_retry: Vec<RetryItem>,
    pub retry_counts: RetryCounts,
    pub usage: TokenUsage,
    pub logs: Vec<String>,
    pub ko_decision: Option<Decision>,
    pub final_decision: Option<Decision>,
    pub translate_passes: u32,
    pub updates: Vec<CellUpdate>,
}

impl PipelineState {
    pub fn new(request: &RunRequest, rows: Vec<SheetRow>) -> Self {
        Self {
            sheet_name: request.sheet_name.clone(),
            mode: request.mode,
            target_languages: request.target_languages.clone(),
            custom_prompt: request.custom_prompt.clone(),
            original_rows: rows,
            ..Self::default()
        }
    }

    /// Seeds proofreading from a previous run so it is not paid for twice.
    pub fn with_cached_proofreading(mut self, results: Vec<ProofreadResult>, usage: TokenUsage) -> Self {
        self.proofreading_results = results;
        self.proofreading_cached = true;
        self.usage = usage;
        self
    }

    /// Merges a stage's output. Logs append; every other present field replaces.
    pub fn apply(&mut self, patch: StatePatch) {
        let StatePatch {
            backup_rows,
            proofreading_results,
            translation_results,
            review_results,
            failed_rows,
            needs_retry,
            retry_counts,
            usage,
            mut logs,
            ko_decision,
            final_decision,
            translate_passes,
            updates,
        } = patch;

        if let Some(v) = backup_rows {
            self.backup_rows = v;
        }
        if let Some(v) = proofreading_results {
            self.proofreading_results = v;
        }
        if let Some(v) = translation_results {
            self.translation_results = v;
        }
        if let Some(v) = review_results {
            self.review_results = v;
        }
        if let Some(v) = failed_rows {
            self.failed_rows = v;
        }
        if let Some(v) = needs_retry {
            self.needs_retry = v;
        }
        if let Some(v) = retry_counts {
            self.retry_counts = v;
        }
        if let Some(v) = usage {
            self.usage = v;
        }
        if let Some(v) = ko_decision {
            self.ko_decision = Some(v);
        }
        if let Some(v) = final_decision {
            self.final_decision = Some(v);
        }
        if let Some(v) = translate_passes {
            self.translate_passes = v;
        }
        if let Some(v) = updates {
            self.updates = v;
        }
        self.logs.append(&mut logs);
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

/// Partial state produced by one stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub backup_rows: Option<Vec<SheetRow>>,
    pub proofreading_results: Option<Vec<ProofreadResult>>,
    pub translation_results: Option<Vec<TranslationResult>>,
    pub review_results: Option<Vec<ValidationOutcome>>,
    pub failed_rows: Option<Vec<FailedRow>>,
    pub needs_retry: Option<Vec<RetryItem>>,
    pub retry_counts: Option<RetryCounts>,
    pub usage: Option<TokenUsage>,
    pub logs: Vec<String>,
    pub ko_decision: Option<Decision>,
    pub final_decision: Option<Decision>,
    pub translate_passes: Option<u32>,
    pub updates: Option<Vec<CellUpdate>>,
}

impl StatePatch {
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

/// The checkpointable unit: where the run is and everything it has produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub stage: Stage,
    pub state: PipelineState,
    #[serde(default)]
    pub context: Option<RunContext>,
}

impl RunState {
    pub fn new(state: PipelineState) -> Self {
        Self {
            stage: Stage::Backup,
            state,
            context: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// True when parked at a suspend point with no decision recorded yet.
    pub fn is_awaiting_decision(&self) -> bool {
        match self.stage {
            Stage::KoApproval => self.state.ko_decision.is_none(),
            Stage::FinalApproval => self.state.final_decision.is_none(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FailureKind;

    #[test]
    fn test_apply_appends_logs_and_replaces_fields() {
        let mut state = PipelineState::default();
        state.log("first");
        state.failed_rows.push(FailedRow {
            key: "old".to_string(),
            language: "en".to_string(),
            reason: String::new(),
            kind: FailureKind::Transport,
        });

        let mut patch = StatePatch {
            failed_rows: Some(vec![]),
            translate_passes: Some(2),
            ..StatePatch::default()
        };
        patch.log("second");
        state.apply(patch);

        assert_eq!(state.logs, vec!["first", "second"]);
        assert!(state.failed_rows.is_empty());
        assert_eq!(state.translate_passes, 2);
        assert!(state.review_results.is_empty());
    }

    #[test]
    fn test_apply_leaves_absent_fields() {
        let mut state = PipelineState {
            usage: TokenUsage::new(5, 6),
            ..PipelineState::default()
        };
        state.apply(StatePatch::default());
        assert_eq!(state.usage, TokenUsage::new(5, 6));
    }

    #[test]
    fn test_request_validation() {
        let config = PipelineConfig::default();
        assert!(RunRequest::new("Sheet1", &["en", "ja"]).validate(&config).is_ok());

        let err = RunRequest::new("Sheet1", &[]).validate(&config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));

        let err = RunRequest::new("Sheet1", &["fr"]).validate(&config).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedLanguage(lang) if lang == "fr"));

        let err = RunRequest::new("Sheet1", &["en", "en"]).validate(&config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));

        let err = RunRequest::new(" ", &["en"]).validate(&config).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[test]
    fn test_awaiting_decision() {
        let mut run = RunState::new(PipelineState::default());
        assert!(!run.is_awaiting_decision());
        run.stage = Stage::KoApproval;
        assert!(run.is_awaiting_decision());
        run.state.ko_decision = Some(Decision::Approved);
        assert!(!run.is_awaiting_decision());
    }

    #[test]
    fn test_run_state_serializes() {
        let mut run = RunState::new(PipelineState::default());
        run.stage = Stage::FinalApproval;
        run.state.retry_counts.increment("A1", "en", 3);
        let json = serde_json::to_string(&run).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }
}
