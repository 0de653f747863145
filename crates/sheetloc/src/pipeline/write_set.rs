use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{CellUpdate, ChangeKind};

use super::context::RunContext;
use super::state::{PipelineState, StatePatch};
use super::StageEnv;

/// Computes the cell writes for an approved run.
///
/// Translations are written only where the text differs from the cell. Each
/// touched row then gets exactly one status marker: review-failed wins over
/// completed, so a row with any failed language is never marked completed.
pub(super) fn run(env: &StageEnv<'_>, state: &PipelineState, ctx: &RunContext) -> StatePatch {
    let columns = &env.config.columns;
    let status = &env.config.status_values;
    let mut patch = StatePatch::default();

    let row_by_key: HashMap<&str, usize> = state
        .original_rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.get(&columns.key), i))
        .filter(|(key, _)| !key.is_empty())
        .collect();
    let failed_keys: HashSet<&str> = state.failed_rows.iter().map(|f| f.key.as_str()).collect();

    let mut updates = Vec::new();
    let mut unchanged = 0usize;
    // Row index -> marker, ordered so the write batch is deterministic.
    let mut markers: BTreeMap<usize, ChangeKind> = BTreeMap::new();

    for outcome in &state.review_results {
        let Some(&row_index) = row_by_key.get(outcome.key.as_str()) else {
            log::warn!("Reviewed key {} is not in the loaded rows", outcome.key);
            continue;
        };
        let Some(column) = ctx.column_for(&outcome.language) else {
            continue;
        };

        if state.original_rows[row_index].get(column) == outcome.translated_text {
            unchanged += 1;
        } else {
            updates.push(CellUpdate {
                row_index,
                column: column.to_string(),
                value: outcome.translated_text.clone(),
                change: ChangeKind::Translation,
            });
        }

        if !failed_keys.contains(outcome.key.as_str()) {
            markers.entry(row_index).or_insert(ChangeKind::Completed);
        }
    }

    for failed in &state.failed_rows {
        if let Some(&row_index) = row_by_key.get(failed.key.as_str()) {
            markers.insert(row_index, ChangeKind::ReviewFailed);
        }
    }

    let translations = updates.len();
    let mut completed = 0usize;
    let mut review_failed = 0usize;
    for (row_index, change) in markers {
        let value = match change {
            ChangeKind::ReviewFailed => {
                review_failed += 1;
                status.review_failed.clone()
            }
            _ => {
                completed += 1;
                status.completed.clone()
            }
        };
        updates.push(CellUpdate {
            row_index,
            column: columns.status.clone(),
            value,
            change,
        });
    }

    patch.log(format!(
        "[write] {} cells to update, {} unchanged, {} rows completed, {} rows review-failed",
        translations, unchanged, completed, review_failed
    ));
    patch.updates = Some(updates);
    patch
}
