//! Pipeline runs driven directly through `Pipeline::advance` and
//! `Pipeline::resume`, without sessions or workers.

mod common;

use std::sync::{Arc, Mutex};

use common::{pipeline_config, request, responder, revisions, row, translations, ScriptedLlm, SheetBuilder};
use sheetloc::model::{ChangeKind, Decision, FailureKind};
use sheetloc::pipeline::{PipelineEvent, RecordingSink};
use sheetloc::{Pipeline, RunState, Stage};

fn pipeline(llm: ScriptedLlm) -> Pipeline {
    Pipeline::new(Arc::new(pipeline_config()), Arc::new(llm))
}

fn started(pipeline: &Pipeline, rows: Vec<sheetloc::model::SheetRow>, languages: &[&str]) -> (RunState, RecordingSink) {
    let sink = RecordingSink::new();
    let mut run = pipeline.new_run(&request(languages), rows).unwrap();
    pipeline.advance(&mut run, &sink).unwrap();
    (run, sink)
}

/// Translator that records the Korean text it was asked to translate.
fn recording_translator(seen: Arc<Mutex<Vec<String>>>) -> ScriptedLlm {
    ScriptedLlm::new().translate_with(responder(move |items, _| {
        seen.lock()
            .unwrap()
            .extend(items.iter().map(|(_, korean)| korean.clone()));
        translations(items, |k| k.to_string())
    }))
}

#[test]
fn test_proofreading_revision_feeds_translation_only_when_approved() {
    for (decision, expected) in [(Decision::Approved, "안녕"), (Decision::Rejected, "안넝")] {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let llm = recording_translator(Arc::clone(&seen)).proofread_with(responder(|items, _| {
            revisions(items, |k| (k == "안넝").then(|| "안녕".to_string()))
        }));
        let pipeline = pipeline(llm);
        let (mut run, sink) = started(&pipeline, vec![row("A1", "안넝")], &["en"]);

        match pipeline.suspend_payload(&run) {
            Some(PipelineEvent::KoReviewReady { count, issues, .. }) => {
                assert_eq!(count, 1);
                assert_eq!(issues, 1);
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        pipeline.resume(&mut run, decision, &sink).unwrap();
        assert_eq!(run.stage, Stage::FinalApproval);
        assert_eq!(*seen.lock().unwrap(), vec![expected.to_string()]);
    }
}

#[test]
fn test_proofreading_that_breaks_tags_is_discarded() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let llm = recording_translator(Arc::clone(&seen)).proofread_with(responder(|items, _| {
        revisions(items, |k| Some(k.replace("\\n", " ")))
    }));
    let pipeline = pipeline(llm);
    let (mut run, sink) = started(&pipeline, vec![row("A1", "안녕\\n친구")], &["en"]);

    pipeline.resume(&mut run, Decision::Approved, &sink).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["안녕\\n친구".to_string()]);
    assert_eq!(run.state.review_results.len(), 1);
    assert_eq!(run.state.review_results[0].translated_text, "안녕\\n친구");
}

#[test]
fn test_every_pair_ends_written_or_failed() {
    // A1 passes at once, A2 heals on retry, A3 never keeps its tag, A4 is dropped.
    let llm = ScriptedLlm::new().translate_with(responder(|items, retry| {
        let replies: Vec<_> = items
            .iter()
            .filter(|(key, _)| key != "A4")
            .map(|(key, korean)| {
                let text = match key.as_str() {
                    "A2" if !retry => "broken".to_string(),
                    "A3" => "no tag".to_string(),
                    _ => korean.clone(),
                };
                serde_json::json!({"key": key, "translated": text})
            })
            .collect();
        Ok(serde_json::to_string(&replies).unwrap())
    }));
    let pipeline = pipeline(llm);
    let rows = vec![
        row("A1", "하나 {n}"),
        row("A2", "둘 {n}"),
        row("A3", "셋 {n}"),
        row("A4", "넷 {n}"),
    ];
    let (mut run, sink) = started(&pipeline, rows, &["en", "ja"]);

    pipeline.resume(&mut run, Decision::Approved, &sink).unwrap();
    assert_eq!(run.stage, Stage::FinalApproval);

    let state = &run.state;
    assert_eq!(state.review_results.len() + state.failed_rows.len(), 8);
    assert!(state.needs_retry.is_empty());

    let failed = |key: &str| {
        state
            .failed_rows
            .iter()
            .filter(|f| f.key == key)
            .map(|f| f.kind)
            .collect::<Vec<_>>()
    };
    assert!(failed("A1").is_empty());
    assert!(failed("A2").is_empty());
    assert_eq!(failed("A3"), vec![FailureKind::TagMismatch; 2]);
    assert_eq!(failed("A4"), vec![FailureKind::Dropped; 2]);
    assert_eq!(state.retry_counts.get("A3", "ja"), 3);
}

#[test]
fn test_write_set_addresses_sheet_positions() {
    let sheet = SheetBuilder::new()
        .row("A1", "하나")
        .blank_row()
        .translated_row("A2", "둘", "two")
        .row("A3", "셋");
    let llm = ScriptedLlm::new().translate_with(responder(|items, _| {
        translations(items, |k| match k {
            "하나" => "one".to_string(),
            "둘" => "two".to_string(),
            _ => "three".to_string(),
        })
    }));
    let pipeline = pipeline(llm);
    let (mut run, sink) = started(&pipeline, sheet.rows(), &["en"]);

    pipeline.resume(&mut run, Decision::Approved, &sink).unwrap();
    pipeline.resume(&mut run, Decision::Approved, &sink).unwrap();
    assert!(run.is_done());

    let translations: Vec<_> = run
        .state
        .updates
        .iter()
        .filter(|u| u.change == ChangeKind::Translation)
        .map(|u| (u.row_index, u.value.as_str()))
        .collect();
    assert_eq!(translations, vec![(0, "one"), (3, "three")]);

    let completed: Vec<_> = run
        .state
        .updates
        .iter()
        .filter(|u| u.change == ChangeKind::Completed)
        .map(|u| u.row_index)
        .collect();
    assert_eq!(completed, vec![0, 2, 3]);
}

#[test]
fn test_final_rejection_skips_the_write_set() {
    let pipeline = pipeline(ScriptedLlm::new());
    let (mut run, sink) = started(&pipeline, vec![row("A1", "안녕")], &["en"]);

    pipeline.resume(&mut run, Decision::Approved, &sink).unwrap();
    pipeline.resume(&mut run, Decision::Rejected, &sink).unwrap();

    assert!(run.is_done());
    assert!(run.state.updates.is_empty());
    let ran_write_set = sink.events().iter().any(|e| {
        matches!(e, PipelineEvent::NodeUpdate { node, .. } if *node == Stage::WriteSetCompute)
    });
    assert!(!ran_write_set);
}
