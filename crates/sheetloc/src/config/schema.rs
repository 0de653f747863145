use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::TranslationMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: String,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub columns: ColumnConfig,
    #[serde(default = "default_languages")]
    pub languages: BTreeMap<String, String>,
    #[serde(default)]
    pub status_values: StatusValues,
    #[serde(default = "default_glossary")]
    pub glossary: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub game_synopsis: String,
    #[serde(default = "default_tone_and_manner")]
    pub tone_and_manner: String,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            pipeline: PipelineSettings::default(),
            columns: ColumnConfig::default(),
            languages: default_languages(),
            status_values: StatusValues::default(),
            glossary: default_glossary(),
            game_synopsis: String::new(),
            tone_and_manner: default_tone_and_manner(),
            sessions: SessionSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_languages() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("en".to_string(), "English(en)".to_string()),
        ("ja".to_string(), "Japanese(ja)".to_string()),
    ])
}

/// Item-grade names have fixed Japanese renderings in every shipped title.
fn default_glossary() -> BTreeMap<String, BTreeMap<String, String>> {
    let ja = [
        ("일반", "一般"),
        ("고급", "高級"),
        ("희귀", "レア"),
        ("영웅", "英雄"),
        ("전설", "伝説"),
        ("신화", "神話"),
        ("고대", "古代"),
    ]
    .into_iter()
    .map(|(ko, ja)| (ko.to_string(), ja.to_string()))
    .collect();

    BTreeMap::from([("ja".to_string(), ja)])
}

fn default_tone_and_manner() -> String {
    "Keep a humorous, casual tone that never gets too serious.".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Inline API key. Prefer `api_key_file` or `api_key_env` outside local testing.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub pricing: Pricing,
}

fn default_base_url() -> String {
    "https://api.x.ai/v1".to_string()
}

fn default_model() -> String {
    "grok-4-1-fast-reasoning".to_string()
}

fn default_api_key_env() -> Option<String> {
    Some("XAI_API_KEY".to_string())
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            api_key_file: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            pricing: Pricing::default(),
        }
    }
}

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    #[serde(default = "default_input_price")]
    pub input_per_million: f64,
    #[serde(default = "default_output_price")]
    pub output_per_million: f64,
}

fn default_input_price() -> f64 {
    0.20
}

fn default_output_price() -> f64 {
    0.50
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_million: default_input_price(),
            output_per_million: default_output_price(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// Delay between per-item progress events. 0 disables drip-feeding.
    #[serde(default = "default_drip_delay_ms")]
    pub drip_delay_ms: u64,
    #[serde(default)]
    pub default_mode: TranslationMode,
}

fn default_chunk_size() -> usize {
    15
}

fn default_max_retry_count() -> u32 {
    3
}

fn default_drip_delay_ms() -> u64 {
    150
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_retry_count: default_max_retry_count(),
            drip_delay_ms: default_drip_delay_ms(),
            default_mode: TranslationMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default = "default_key_column")]
    pub key: String,
    #[serde(default = "default_korean_column")]
    pub korean: String,
    #[serde(default = "default_shared_comments_column")]
    pub shared_comments: String,
    #[serde(default = "default_status_column")]
    pub status: String,
}

fn default_key_column() -> String {
    "Key".to_string()
}

fn default_korean_column() -> String {
    "Korean(ko)".to_string()
}

fn default_shared_comments_column() -> String {
    "Shared Comments".to_string()
}

fn default_status_column() -> String {
    "Tool_Status".to_string()
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            key: default_key_column(),
            korean: default_korean_column(),
            shared_comments: default_shared_comments_column(),
            status: default_status_column(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusValues {
    #[serde(default = "default_completed")]
    pub completed: String,
    #[serde(default = "default_review_failed")]
    pub review_failed: String,
}

fn default_completed() -> String {
    "Completed".to_string()
}

fn default_review_failed() -> String {
    "Review Failed".to_string()
}

impl Default for StatusValues {
    fn default() -> Self {
        Self {
            completed: default_completed(),
            review_failed: default_review_failed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// SQLite file for checkpoints. In-memory checkpoints when unset.
    #[serde(default)]
    pub checkpoint_path: Option<String>,
}

fn default_max_sessions() -> usize {
    10
}

fn default_worker_count() -> usize {
    4
}

fn default_event_buffer() -> usize {
    256
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            worker_count: default_worker_count(),
            event_buffer: default_event_buffer(),
            checkpoint_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
