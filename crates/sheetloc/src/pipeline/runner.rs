use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info_span};

use crate::llm::LlmGateway;
use crate::model::{CostSummary, Decision, SheetRow};

use super::config::PipelineConfig;
use super::context::RunContext;
use super::error::PipelineError;
use super::progress::{EventSink, OriginalRow, PipelineEvent};
use super::state::{PipelineState, RunRequest, RunState, Stage, StatePatch};
use super::{proofread, review, translate, write_set, StageEnv};

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn LlmGateway>,
}

impl Pipeline {
    pub fn new(config: Arc<PipelineConfig>, gateway: Arc<dyn LlmGateway>) -> Self {
        Self { config, gateway }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn env(&self) -> StageEnv<'_> {
        StageEnv {
            config: &self.config,
            gateway: self.gateway.as_ref(),
        }
    }

    /// Validates the request and the loaded rows and builds a fresh run.
    ///
    /// The row limit keeps the first rows of the sheet. Rows stay at their
    /// sheet positions, blank ones included, since cell updates address rows
    /// by index. A row with text but no key, or a key used twice, rejects the
    /// whole request.
    pub fn new_run(&self, request: &RunRequest, mut rows: Vec<SheetRow>) -> Result<RunState, PipelineError> {
        request.validate(&self.config)?;

        if let Some(limit) = request.row_limit {
            rows.truncate(limit);
        }

        let columns = &self.config.columns;
        let mut seen = HashSet::new();

        for (i, row) in rows.iter().enumerate() {
            let key = row.get(&columns.key).trim();
            if key.is_empty() {
                if row.get(&columns.korean).trim().is_empty() {
                    continue;
                }
                return Err(PipelineError::InvalidRequest(format!(
                    "row {} has Korean text but no key",
                    i + 1
                )));
            }
            if !seen.insert(key.to_string()) {
                return Err(PipelineError::DuplicateKey(key.to_string()));
            }
        }

        Ok(RunState::new(PipelineState::new(request, rows)))
    }

    /// Runs stages until the next suspend point or the end of the run.
    ///
    /// A `node_update` event follows every completed stage. On reaching a
    /// suspend point the stage payload is emitted after an `interrupt`.
    pub fn advance(&self, run: &mut RunState, sink: &dyn EventSink) -> Result<(), PipelineError> {
        let _pipeline_span = info_span!("pipeline",
            sheet = %run.state.sheet_name,
            languages = %run.state.target_languages.join(","),
        )
        .entered();

        loop {
            if run.is_done() {
                return Ok(());
            }
            if run.is_awaiting_decision() {
                debug!("Suspended at {}", run.stage);
                sink.emit(PipelineEvent::Interrupt {});
                if let Some(payload) = self.suspend_payload(run) {
                    sink.emit(payload);
                }
                return Ok(());
            }
            if sink.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let stage = run.stage;
            let _step = info_span!("stage", name = stage.as_str()).entered();
            let (patch, next) = self.run_stage(run, sink)?;

            sink.emit(PipelineEvent::NodeUpdate {
                node: stage,
                logs: patch.logs.clone(),
            });
            run.state.apply(patch);
            debug!("{} -> {}", stage, next);
            run.stage = next;
        }
    }

    fn run_stage(&self, run: &mut RunState, sink: &dyn EventSink) -> Result<(StatePatch, Stage), PipelineError> {
        let env = self.env();
        let state = &run.state;

        match run.stage {
            Stage::Backup => Ok((self.backup(state, sink), Stage::ContextSetup)),
            Stage::ContextSetup => {
                let ctx = RunContext::snapshot(&self.config, &state.target_languages, &state.custom_prompt)?;
                let mut patch = StatePatch::default();
                for target in &ctx.languages {
                    if ctx.glossary.has_terms(&target.code) {
                        let count = ctx.glossary.entries(&target.code).len();
                        patch.log(format!("[context] {}: glossary with {} terms", target.code, count));
                    } else {
                        patch.log(format!("[context] {}: no glossary, free translation", target.code));
                    }
                }
                run.context = Some(ctx);
                Ok((patch, Stage::KoProofread))
            }
            Stage::KoProofread => Ok((proofread::run(&env, state, sink)?, Stage::KoApproval)),
            Stage::KoApproval => {
                let mut patch = StatePatch::default();
                match state.ko_decision {
                    Some(Decision::Approved) => patch.log(format!(
                        "[ko_approval] approved: {} proofreading revisions applied",
                        state.proofreading_results.len()
                    )),
                    _ => patch.log("[ko_approval] rejected: translating the original Korean text"),
                }
                Ok((patch, Stage::Translate))
            }
            Stage::Translate => {
                let ctx = run.context.as_ref().ok_or(PipelineError::MissingContext(Stage::Translate))?;
                Ok((translate::run(&env, state, ctx, sink)?, Stage::ValidateReview))
            }
            Stage::ValidateReview => {
                let ctx = run
                    .context
                    .as_ref()
                    .ok_or(PipelineError::MissingContext(Stage::ValidateReview))?;
                let patch = review::run(&env, state, ctx, sink)?;
                let retry = patch.needs_retry.as_ref().is_some_and(|items| !items.is_empty());
                let next = if retry { Stage::Translate } else { Stage::FinalApproval };
                Ok((patch, next))
            }
            Stage::FinalApproval => {
                let mut patch = StatePatch::default();
                if state.final_decision == Some(Decision::Approved) {
                    patch.log("[final_approval] approved: computing sheet updates");
                    Ok((patch, Stage::WriteSetCompute))
                } else {
                    patch.log("[final_approval] rejected: nothing will be written");
                    patch.updates = Some(Vec::new());
                    Ok((patch, Stage::Done))
                }
            }
            Stage::WriteSetCompute => {
                let ctx = run
                    .context
                    .as_ref()
                    .ok_or(PipelineError::MissingContext(Stage::WriteSetCompute))?;
                Ok((write_set::run(&env, state, ctx), Stage::Done))
            }
            Stage::Done => Err(PipelineError::AlreadyTerminal),
        }
    }

    /// Key and Korean text of every row in the run, in sheet order.
    pub fn original_rows(&self, state: &PipelineState) -> Vec<OriginalRow> {
        let columns = &self.config.columns;
        state
            .original_rows
            .iter()
            .map(|row| OriginalRow {
                key: row.get(&columns.key).to_string(),
                korean: row.get(&columns.korean).to_string(),
            })
            .collect()
    }

    fn backup(&self, state: &PipelineState, sink: &dyn EventSink) -> StatePatch {
        sink.emit(PipelineEvent::OriginalData {
            rows: self.original_rows(state),
        });

        let mut patch = StatePatch {
            backup_rows: Some(state.original_rows.clone()),
            ..StatePatch::default()
        };
        patch.log(format!(
            "[backup] {} rows from '{}' saved",
            state.original_rows.len(),
            state.sheet_name
        ));
        patch
    }

    /// The `*_ready` payload for the suspend point the run is parked at.
    pub fn suspend_payload(&self, run: &RunState) -> Option<PipelineEvent> {
        match run.stage {
            Stage::KoApproval => {
                let results = proofread::review_view(&self.env(), &run.state);
                let issues = results.iter().filter(|r| r.has_issue).count();
                Some(PipelineEvent::KoReviewReady {
                    count: results.len(),
                    issues,
                    results,
                })
            }
            Stage::FinalApproval => Some(PipelineEvent::FinalReviewReady {
                review_results: run.state.review_results.clone(),
                failed_rows: run.state.failed_rows.clone(),
                cost: self.cost(&run.state),
            }),
            _ => None,
        }
    }

    pub fn cost(&self, state: &PipelineState) -> CostSummary {
        CostSummary::from_usage(state.usage, &self.config.pricing)
    }

    /// Records a decision for the suspend point the run is parked at.
    pub fn apply_decision(&self, run: &mut RunState, decision: Decision) -> Result<(), PipelineError> {
        if run.is_done() {
            return Err(PipelineError::AlreadyTerminal);
        }
        if !run.is_awaiting_decision() {
            return Err(PipelineError::NotSuspended(run.stage));
        }

        match run.stage {
            Stage::KoApproval => run.state.ko_decision = Some(decision),
            _ => run.state.final_decision = Some(decision),
        }
        run.state.log(format!("[{}] decision received: {}", run.stage, decision));
        Ok(())
    }

    pub fn resume(&self, run: &mut RunState, decision: Decision, sink: &dyn EventSink) -> Result<(), PipelineError> {
        self.apply_decision(run, decision)?;
        self.advance(run, sink)
    }
}
