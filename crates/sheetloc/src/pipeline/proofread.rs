use crate::batch::chunk_count;
use crate::llm::prompts::{proofread_user_prompt, proofreader_system_prompt};
use crate::llm::ProofreadReply;
use crate::model::{ProofreadResult, WorkItem};
use crate::validation::{normalize_escapes, tags_preserved};

use super::error::PipelineError;
use super::progress::{ChunkProgress, EventSink, PipelineEvent};
use super::state::{PipelineState, StatePatch};
use super::StageEnv;

fn korean_items(state: &PipelineState, env: &StageEnv<'_>) -> Vec<WorkItem> {
    let columns = &env.config.columns;
    state
        .original_rows
        .iter()
        .filter(|row| !row.get(&columns.korean).trim().is_empty())
        .map(|row| WorkItem {
            key: row.get(&columns.key).to_string(),
            source_text: row.get(&columns.korean).to_string(),
            language: "ko".to_string(),
            shared_comments: String::new(),
        })
        .collect()
}

pub(super) fn run(
    env: &StageEnv<'_>,
    state: &PipelineState,
    sink: &dyn EventSink,
) -> Result<StatePatch, PipelineError> {
    let mut patch = StatePatch::default();

    if state.proofreading_cached {
        patch.log(format!(
            "[proofread] reusing {} cached suggestions",
            state.proofreading_results.len()
        ));
        return Ok(patch);
    }

    let items = korean_items(state, env);
    patch.log(format!("[proofread] {} rows to check", items.len()));

    let system_prompt = proofreader_system_prompt();
    let batcher = env.batcher(sink);
    let mut progress = ChunkProgress::new(sink, 0, items.len(), env.config.drip_delay);
    let mut results = Vec::new();
    let mut discarded = 0usize;
    let mut logs = Vec::new();

    let summary = batcher.run::<_, ProofreadReply, _, _>(
        &system_prompt,
        &items,
        proofread_user_prompt,
        |reply| {
            let mut chunk_results = Vec::new();
            match reply.outcome {
                Ok(reassembled) => {
                    for (item, answer) in reply.items.iter().zip(reassembled.aligned) {
                        // Rows the model left out need no change.
                        let Some(answer) = answer else { continue };
                        let revised = normalize_escapes(&answer.revised);
                        if revised.is_empty() || revised == normalize_escapes(&item.source_text) {
                            continue;
                        }
                        if !tags_preserved(&item.source_text, &revised) {
                            discarded += 1;
                            continue;
                        }
                        chunk_results.push(ProofreadResult {
                            key: item.key.clone(),
                            original: item.source_text.clone(),
                            revised,
                            comment: answer.changes,
                            has_issue: true,
                        });
                    }
                }
                Err(e) => {
                    logs.push(format!(
                        "[proofread] chunk {}/{} failed: {}",
                        reply.index + 1,
                        reply.total_chunks,
                        e
                    ));
                }
            }

            results.extend(chunk_results.iter().cloned());
            progress.emit(chunk_results, reply.items.len(), |items, progress| {
                PipelineEvent::KoReviewChunk {
                    chunk_results: items,
                    progress,
                }
            });
            Ok(())
        },
    )?;

    patch.logs.extend(logs);
    if discarded > 0 {
        patch.log(format!(
            "[proofread] discarded {} suggestions that broke formatting tags (original kept)",
            discarded
        ));
    }
    patch.log(format!(
        "[proofread] {} suggestions from {} chunks",
        results.len(),
        chunk_count(items.len(), env.config.chunk_size)
    ));

    let mut usage = state.usage;
    usage.add(summary.usage);
    patch.usage = Some(usage);
    patch.proofreading_results = Some(results);
    Ok(patch)
}

/// Full proofreading view: one entry per Korean row, unchanged rows included.
pub(super) fn review_view(env: &StageEnv<'_>, state: &PipelineState) -> Vec<ProofreadResult> {
    korean_items(state, env)
        .into_iter()
        .map(|item| {
            state
                .proofreading_results
                .iter()
                .find(|r| r.key == item.key)
                .cloned()
                .unwrap_or_else(|| ProofreadResult::unchanged(item.key, item.source_text))
        })
        .collect()
}
