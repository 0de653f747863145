//! Data types shared by the pipeline stages, the session layer and the
//! checkpoint store. Everything here is plain serde data so a whole run can be
//! persisted as JSON and picked up again in another process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::Pricing;

/// One spreadsheet data row, column name to cell value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetRow {
    pub cells: BTreeMap<String, String>,
}

impl SheetRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Missing cells read as the empty string.
    pub fn get(&self, column: &str) -> &str {
        self.cells.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.cells.insert(column.into(), value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub key: String,
    pub source_text: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shared_comments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// LLM call failed, timed out or returned unparseable output.
    Transport,
    /// The LLM answered but left the item out or returned it empty.
    Dropped,
    /// Tag validation kept failing until the retry limit was reached.
    TagMismatch,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "transport"),
            FailureKind::Dropped => write!(f, "dropped"),
            FailureKind::TagMismatch => write!(f, "tag_mismatch"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub key: String,
    pub language: String,
    pub translated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl TranslationResult {
    pub fn ok(key: impl Into<String>, language: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            language: language.into(),
            translated_text: text.into(),
            error: None,
        }
    }

    pub fn failed(
        key: impl Into<String>,
        language: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            language: language.into(),
            translated_text: String::new(),
            error: Some(ItemError {
                kind,
                message: message.into(),
            }),
        }
    }
}

/// A translation that passed tag validation, annotated for the final review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub key: String,
    pub language: String,
    pub source_text: String,
    pub translated_text: String,
    pub old_translation: String,
    pub tag_valid: bool,
    pub tag_errors: Vec<String>,
    pub glossary_compliant: bool,
    pub glossary_violations: Vec<String>,
    pub ai_issues: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofreadResult {
    pub key: String,
    pub original: String,
    pub revised: String,
    pub comment: String,
    pub has_issue: bool,
}

impl ProofreadResult {
    /// Placeholder for rows the proofreader left untouched.
    pub fn unchanged(key: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            key: key.into(),
            original: text.clone(),
            revised: text,
            comment: String::new(),
            has_issue: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRow {
    pub key: String,
    pub language: String,
    pub reason: String,
    pub kind: FailureKind,
}

/// Feedback carried from a failed validation round into the retry prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryItem {
    pub key: String,
    pub language: String,
    pub source_text: String,
    #[serde(default)]
    pub shared_comments: String,
    pub previous_translation: String,
    pub feedback: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub key: String,
    pub language: String,
    pub attempts: u32,
}

/// Per (key, language) retry counters. Never reset within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<RetryRecord>", into = "Vec<RetryRecord>")]
pub struct RetryCounts {
    counts: BTreeMap<(String, String), u32>,
}

impl RetryCounts {
    pub fn get(&self, key: &str, language: &str) -> u32 {
        self.counts
            .get(&(key.to_string(), language.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Bumps the counter, saturating at `cap`, and returns the new value.
    pub fn increment(&mut self, key: &str, language: &str, cap: u32) -> u32 {
        let entry = self
            .counts
            .entry((key.to_string(), language.to_string()))
            .or_insert(0);
        *entry = (*entry + 1).min(cap);
        *entry
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl From<Vec<RetryRecord>> for RetryCounts {
    fn from(records: Vec<RetryRecord>) -> Self {
        let counts = records
            .into_iter()
            .map(|r| ((r.key, r.language), r.attempts))
            .collect();
        Self { counts }
    }
}

impl From<RetryCounts> for Vec<RetryRecord> {
    fn from(counts: RetryCounts) -> Self {
        counts
            .counts
            .into_iter()
            .map(|((key, language), attempts)| RetryRecord {
                key,
                language,
                attempts,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Translation,
    Completed,
    ReviewFailed,
}

/// A single cell write. `row_index` is the zero-based position in the loaded rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub row_index: usize,
    pub column: String,
    pub value: String,
    pub change: ChangeKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid decision '{0}': expected 'approved' or 'rejected'")]
pub struct ParseDecisionError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl FromStr for Decision {
    type Err = ParseDecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            other => Err(ParseDecisionError(other.to_string())),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approved => write!(f, "approved"),
            Decision::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationMode {
    /// Translate every row with Korean text.
    #[default]
    #[serde(alias = "A")]
    Full,
    /// Only rows whose target cell is still empty.
    #[serde(alias = "B")]
    FillBlanks,
}

impl FromStr for TranslationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" | "A" => Ok(TranslationMode::Full),
            "fill_blanks" | "B" => Ok(TranslationMode::FillBlanks),
            other => Err(format!("unknown translation mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl CostSummary {
    pub fn from_usage(usage: TokenUsage, pricing: &Pricing) -> Self {
        let cost = usage.input_tokens as f64 * pricing.input_per_million / 1_000_000.0
            + usage.output_tokens as f64 * pricing.output_per_million / 1_000_000.0;

        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            estimated_cost_usd: (cost * 10_000.0).round() / 10_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_parsing_is_strict() {
        assert_eq!("approved".parse::<Decision>().unwrap(), Decision::Approved);
        assert_eq!("rejected".parse::<Decision>().unwrap(), Decision::Rejected);
        assert!("Approved".parse::<Decision>().is_err());
        assert!("yes".parse::<Decision>().is_err());
        assert!("".parse::<Decision>().is_err());
    }

    #[test]
    fn test_translation_mode_aliases() {
        let mode: TranslationMode = serde_json::from_str("\"B\"").unwrap();
        assert_eq!(mode, TranslationMode::FillBlanks);
        let mode: TranslationMode = serde_json::from_str("\"full\"").unwrap();
        assert_eq!(mode, TranslationMode::Full);
        assert_eq!("A".parse::<TranslationMode>().unwrap(), TranslationMode::Full);
        assert!("C".parse::<TranslationMode>().is_err());
    }

    #[test]
    fn test_retry_counts_saturate_at_cap() {
        let mut counts = RetryCounts::default();
        assert_eq!(counts.increment("A1", "en", 3), 1);
        assert_eq!(counts.increment("A1", "en", 3), 2);
        assert_eq!(counts.increment("A1", "en", 3), 3);
        assert_eq!(counts.increment("A1", "en", 3), 3);
        assert_eq!(counts.get("A1", "ja"), 0);
    }

    #[test]
    fn test_retry_counts_serialize_as_records() {
        let mut counts = RetryCounts::default();
        counts.increment("A1", "en", 3);
        counts.increment("A1", "ja", 3);
        counts.increment("A1", "ja", 3);

        let json = serde_json::to_value(&counts).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"key": "A1", "language": "en", "attempts": 1},
                {"key": "A1", "language": "ja", "attempts": 2}
            ])
        );

        let back: RetryCounts = serde_json::from_value(json).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn test_cost_summary() {
        let pricing = Pricing::default();
        let summary = CostSummary::from_usage(TokenUsage::new(1_000_000, 2_000_000), &pricing);
        assert_eq!(summary.total_tokens, 3_000_000);
        assert!((summary.estimated_cost_usd - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_sheet_row_missing_cell_is_empty() {
        let row = SheetRow::new().with("Key", "A1");
        assert_eq!(row.get("Key"), "A1");
        assert_eq!(row.get("English(en)"), "");
    }
}
