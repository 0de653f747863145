use std::collections::HashMap;

use crate::llm::prompts::{review_user_prompt, reviewer_system_prompt};
use crate::llm::{ReviewReply, ReviewStatus};
use crate::model::{FailedRow, FailureKind, RetryItem, ValidationOutcome};
use crate::validation::validate_tags;

use super::context::RunContext;
use super::error::PipelineError;
use super::progress::{ChunkProgress, EventSink, PipelineEvent, Progress};
use super::state::{PipelineState, StatePatch};
use super::translate::{working_rows, WorkingRow};
use super::StageEnv;

/// Folds glossary warnings and AI findings into one human-readable reason.
pub(super) fn merge_reason(reason: &str, warnings: &[String]) -> String {
    let reason = reason.trim();
    match (reason.is_empty(), warnings.is_empty()) {
        (_, true) => reason.to_string(),
        (true, false) => warnings.join("; "),
        (false, false) => format!("{} | warnings: {}", reason, warnings.join("; ")),
    }
}

fn review_event(items: Vec<ValidationOutcome>, progress: Progress) -> PipelineEvent {
    PipelineEvent::ReviewChunk {
        chunk_results: items,
        progress,
    }
}

pub(super) fn run(
    env: &StageEnv<'_>,
    state: &PipelineState,
    ctx: &RunContext,
    sink: &dyn EventSink,
) -> Result<StatePatch, PipelineError> {
    let max_retry = env.config.max_retry_count;
    let mut patch = StatePatch::default();

    let rows = working_rows(env, state);
    let rows_by_key: HashMap<&str, &WorkingRow> = rows.iter().map(|r| (r.key.as_str(), r)).collect();

    let mut failed_rows = state.failed_rows.clone();
    let mut retry_counts = state.retry_counts.clone();
    let mut needs_retry = Vec::new();
    let mut validated: Vec<ValidationOutcome> = Vec::new();

    for result in &state.translation_results {
        let (key, language) = (result.key.as_str(), result.language.as_str());

        if let Some(error) = &result.error {
            patch.log(format!(
                "[review] {} ({}) failed in translation: {}",
                key, language, error.message
            ));
            failed_rows.push(FailedRow {
                key: key.to_string(),
                language: language.to_string(),
                reason: format!("translation error: {}", error.message),
                kind: error.kind,
            });
            continue;
        }

        let Some(row) = rows_by_key.get(key) else {
            log::warn!("Translation for unknown key {} ({}) ignored", key, language);
            continue;
        };

        let translated = ctx.glossary.apply_postprocess(&result.translated_text, language);
        let tags = validate_tags(&row.source_text, &translated);

        if !tags.valid {
            let attempts = retry_counts.increment(key, language, max_retry);
            if attempts < max_retry {
                patch.log(format!(
                    "[review] tag check failed, retry {}/{}: {} ({})",
                    attempts, max_retry, key, language
                ));
                needs_retry.push(RetryItem {
                    key: key.to_string(),
                    language: language.to_string(),
                    source_text: row.source_text.clone(),
                    shared_comments: row.shared_comments.clone(),
                    previous_translation: translated,
                    feedback: tags.errors,
                });
            } else {
                patch.log(format!(
                    "[review] tag check failed {} times, giving up: {} ({})",
                    max_retry, key, language
                ));
                failed_rows.push(FailedRow {
                    key: key.to_string(),
                    language: language.to_string(),
                    reason: format!(
                        "tag validation failed {} times: {}",
                        max_retry,
                        tags.errors.join("; ")
                    ),
                    kind: FailureKind::TagMismatch,
                });
            }
            continue;
        }

        let glossary = ctx.glossary.check_compliance(&translated, language, &row.source_text);
        if !glossary.compliant {
            patch.log(format!(
                "[review] glossary warning for {} ({}): {}",
                key,
                language,
                glossary.violations.join("; ")
            ));
        }

        let old_translation = ctx
            .column_for(language)
            .map(|column| state.original_rows[row.row_index].get(column).to_string())
            .unwrap_or_default();

        validated.push(ValidationOutcome {
            key: key.to_string(),
            language: language.to_string(),
            source_text: row.source_text.clone(),
            translated_text: translated,
            old_translation,
            tag_valid: true,
            tag_errors: Vec::new(),
            glossary_compliant: glossary.compliant,
            glossary_violations: glossary.violations,
            ai_issues: Vec::new(),
            reason: String::new(),
        });
    }

    patch.log(format!(
        "[review] tag/glossary checks: {} passed, {} queued for retry",
        validated.len(),
        needs_retry.len()
    ));

    let previous = state.review_results.len();
    let mut total = previous + validated.len() + needs_retry.len();
    if total == 0 {
        total = (previous + failed_rows.len()).max(1);
    }

    let mut progress = ChunkProgress::new(sink, previous, total, env.config.drip_delay);
    // Signal the review phase before the first model call.
    progress.emit_status(review_event);

    let mut groups: Vec<(String, Vec<ValidationOutcome>)> = Vec::new();
    for outcome in validated {
        match groups.iter_mut().find(|(lang, _)| *lang == outcome.language) {
            Some((_, items)) => items.push(outcome),
            None => groups.push((outcome.language.clone(), vec![outcome])),
        }
    }

    let mut usage = state.usage;
    let mut reviewed: Vec<ValidationOutcome> = Vec::new();

    for (language, items) in &groups {
        let glossary_text = ctx.glossary.format_for_prompt(language);
        let system_prompt = reviewer_system_prompt(&ctx.prompt_settings(language, &glossary_text));

        let summary = env.batcher(sink).run::<_, ReviewReply, _, _>(
            &system_prompt,
            items.as_slice(),
            review_user_prompt,
            |reply| {
                let answers = match reply.outcome {
                    Ok(reassembled) => reassembled.aligned,
                    Err(e) => {
                        // Review is advisory: a failed call leaves the items passed.
                        patch.log(format!(
                            "[review] {}: AI review chunk {}/{} failed: {}",
                            language,
                            reply.index + 1,
                            reply.total_chunks,
                            e
                        ));
                        vec![None; reply.items.len()]
                    }
                };

                let mut chunk = Vec::with_capacity(reply.items.len());
                for (item, answer) in reply.items.iter().zip(answers) {
                    let mut outcome = item.clone();
                    let mut reason = String::new();
                    if let Some(answer) = answer {
                        if answer.status == ReviewStatus::Fail && !answer.issues.is_empty() {
                            patch.log(format!(
                                "[review] AI flagged {} ({}): {}",
                                outcome.key,
                                outcome.language,
                                answer.issues.join("; ")
                            ));
                            outcome.ai_issues = answer.issues;
                        }
                        reason = answer.reason;
                    }
                    let warnings: Vec<String> = outcome
                        .glossary_violations
                        .iter()
                        .chain(outcome.ai_issues.iter())
                        .cloned()
                        .collect();
                    outcome.reason = merge_reason(&reason, &warnings);
                    chunk.push(outcome);
                }

                reviewed.extend(chunk.iter().cloned());
                let processed = chunk.len();
                progress.emit(chunk, processed, review_event);
                Ok(())
            },
        )?;
        usage.add(summary.usage);
    }

    if reviewed.is_empty() {
        progress.emit_status(review_event);
    }

    let mut review_results = state.review_results.clone();
    review_results.extend(reviewed);

    patch.log(format!(
        "[review] done: {} passed in total, {} failed, {} waiting for retry",
        review_results.len(),
        failed_rows.len(),
        needs_retry.len()
    ));

    patch.review_results = Some(review_results);
    patch.failed_rows = Some(failed_rows);
    patch.needs_retry = Some(needs_retry);
    patch.retry_counts = Some(retry_counts);
    patch.usage = Some(usage);
    Ok(patch)
}
