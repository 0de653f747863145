use std::collections::HashMap;

use crate::batch::ChunkReply;
use crate::llm::prompts::{retry_user_prompt, translation_user_prompt, translator_system_prompt};
use crate::llm::TranslationReply;
use crate::model::{
    Decision, FailureKind, RetryItem, TranslationMode, TranslationResult, WorkItem,
};
use crate::validation::normalize_escapes;

use super::context::RunContext;
use super::error::PipelineError;
use super::progress::{ChunkProgress, EventSink, PipelineEvent};
use super::state::{PipelineState, StatePatch};
use super::StageEnv;

/// Source row as the translator sees it, after the proofreading decision.
#[derive(Debug, Clone)]
pub(super) struct WorkingRow {
    pub row_index: usize,
    pub key: String,
    pub source_text: String,
    pub shared_comments: String,
}

/// Korean text to translate: the approved revision when there is one, else the original.
pub(super) fn working_rows(env: &StageEnv<'_>, state: &PipelineState) -> Vec<WorkingRow> {
    let columns = &env.config.columns;
    let revisions: HashMap<&str, &str> = if state.ko_decision == Some(Decision::Approved) {
        state
            .proofreading_results
            .iter()
            .map(|r| (r.key.as_str(), r.revised.as_str()))
            .collect()
    } else {
        HashMap::new()
    };

    state
        .original_rows
        .iter()
        .enumerate()
        .filter_map(|(row_index, row)| {
            let key = row.get(&columns.key);
            let original = row.get(&columns.korean);
            if original.trim().is_empty() {
                return None;
            }
            let source_text = revisions.get(key).copied().unwrap_or(original);
            Some(WorkingRow {
                row_index,
                key: key.to_string(),
                source_text: source_text.to_string(),
                shared_comments: row.get(&columns.shared_comments).to_string(),
            })
        })
        .collect()
}

pub(super) fn run(
    env: &StageEnv<'_>,
    state: &PipelineState,
    ctx: &RunContext,
    sink: &dyn EventSink,
) -> Result<StatePatch, PipelineError> {
    let mut patch = StatePatch {
        translate_passes: Some(state.translate_passes + 1),
        ..StatePatch::default()
    };
    let mut usage = state.usage;

    let results = if state.needs_retry.is_empty() {
        translate_all(env, state, ctx, sink, &mut patch, &mut usage)?
    } else {
        let results = translate_retries(env, state, ctx, sink, &mut patch, &mut usage)?;
        patch.needs_retry = Some(Vec::new());
        results
    };

    patch.usage = Some(usage);
    patch.translation_results = Some(results);
    Ok(patch)
}

fn translate_all(
    env: &StageEnv<'_>,
    state: &PipelineState,
    ctx: &RunContext,
    sink: &dyn EventSink,
    patch: &mut StatePatch,
    usage: &mut crate::model::TokenUsage,
) -> Result<Vec<TranslationResult>, PipelineError> {
    let rows = working_rows(env, state);

    let mut plan: Vec<(&str, Vec<WorkItem>)> = Vec::new();
    for target in &ctx.languages {
        let items: Vec<WorkItem> = rows
            .iter()
            .filter(|row| {
                state.mode == TranslationMode::Full
                    || state.original_rows[row.row_index]
                        .get(&target.column)
                        .trim()
                        .is_empty()
            })
            .map(|row| WorkItem {
                key: row.key.clone(),
                source_text: row.source_text.clone(),
                language: target.code.clone(),
                shared_comments: row.shared_comments.clone(),
            })
            .collect();
        patch.log(format!(
            "[translate] {}: {} rows to translate",
            target.code,
            items.len()
        ));
        plan.push((target.code.as_str(), items));
    }

    let total = plan.iter().map(|(_, items)| items.len()).sum();
    let mut progress = ChunkProgress::new(sink, 0, total, env.config.drip_delay);
    let mut results = Vec::with_capacity(total);

    for (language, items) in &plan {
        let glossary_text = ctx.glossary.format_for_prompt(language);
        let system_prompt = translator_system_prompt(&ctx.prompt_settings(language, &glossary_text));
        progress.set_language(Some(*language));

        let summary = env.batcher(sink).run::<_, TranslationReply, _, _>(
            &system_prompt,
            items.as_slice(),
            translation_user_prompt,
            |reply| {
                let chunk = collect_chunk(reply, language, patch);
                results.extend(chunk.iter().cloned());
                let processed = chunk.len();
                progress.emit(chunk, processed, |items, progress| {
                    PipelineEvent::TranslationChunk {
                        chunk_results: items,
                        progress,
                    }
                });
                Ok(())
            },
        )?;
        usage.add(summary.usage);
    }

    Ok(results)
}

fn translate_retries(
    env: &StageEnv<'_>,
    state: &PipelineState,
    ctx: &RunContext,
    sink: &dyn EventSink,
    patch: &mut StatePatch,
    usage: &mut crate::model::TokenUsage,
) -> Result<Vec<TranslationResult>, PipelineError> {
    // Group by language, keeping first-seen order.
    let mut groups: Vec<(String, Vec<RetryItem>)> = Vec::new();
    for item in &state.needs_retry {
        match groups.iter_mut().find(|(lang, _)| *lang == item.language) {
            Some((_, items)) => items.push(item.clone()),
            None => groups.push((item.language.clone(), vec![item.clone()])),
        }
    }

    let mut progress = ChunkProgress::new(sink, 0, state.needs_retry.len(), env.config.drip_delay);
    let mut results = Vec::with_capacity(state.needs_retry.len());

    for (language, items) in &groups {
        patch.log(format!(
            "[translate] {}: retrying {} rows (pass {})",
            language,
            items.len(),
            state.translate_passes + 1
        ));
        let glossary_text = ctx.glossary.format_for_prompt(language);
        let system_prompt = translator_system_prompt(&ctx.prompt_settings(language, &glossary_text));
        progress.set_language(Some(language.as_str()));

        let summary = env.batcher(sink).run::<_, TranslationReply, _, _>(
            &system_prompt,
            items.as_slice(),
            retry_user_prompt,
            |reply| {
                let chunk = collect_chunk(reply, language, patch);
                results.extend(chunk.iter().cloned());
                let processed = chunk.len();
                progress.emit(chunk, processed, |items, progress| {
                    PipelineEvent::TranslationChunk {
                        chunk_results: items,
                        progress,
                    }
                });
                Ok(())
            },
        )?;
        usage.add(summary.usage);
    }

    Ok(results)
}

/// Turns one chunk reply into per-item results. Missing or empty items become
/// explicit `dropped` failures so no (key, language) pair goes unaccounted.
fn collect_chunk<I: crate::llm::Keyed>(
    reply: ChunkReply<'_, I, TranslationReply>,
    language: &str,
    patch: &mut StatePatch,
) -> Vec<TranslationResult> {
    match reply.outcome {
        Ok(reassembled) => {
            let mut dropped = 0;
            let results: Vec<TranslationResult> = reply
                .items
                .iter()
                .zip(reassembled.aligned)
                .map(|(item, answer)| match answer {
                    Some(answer) if !answer.translated.trim().is_empty() => TranslationResult::ok(
                        item.key(),
                        language,
                        normalize_escapes(&answer.translated),
                    ),
                    _ => {
                        dropped += 1;
                        TranslationResult::failed(
                            item.key(),
                            language,
                            FailureKind::Dropped,
                            "model returned no translation for this key",
                        )
                    }
                })
                .collect();
            if dropped > 0 {
                patch.log(format!(
                    "[translate] {}: chunk {}/{} left out {} rows",
                    language,
                    reply.index + 1,
                    reply.total_chunks,
                    dropped
                ));
            }
            results
        }
        Err(e) => {
            patch.log(format!(
                "[translate] {}: chunk {}/{} failed: {}",
                language,
                reply.index + 1,
                reply.total_chunks,
                e
            ));
            reply
                .items
                .iter()
                .map(|item| {
                    TranslationResult::failed(item.key(), language, FailureKind::Transport, e.to_string())
                })
                .collect()
        }
    }
}
