use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetlocError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Spreadsheet error: {0}")]
    Sheet(#[from] SheetError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] crate::checkpoint::CheckpointError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid glossary entry for '{language}': {reason}")]
    InvalidGlossary { language: String, reason: String },

    #[error("Language '{0}' has no target column configured")]
    UnknownLanguage(String),
}

/// Failures of a single LLM call. Every variant is a transport-class error:
/// the pipeline never retries these through the validation loop.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM API error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("Malformed LLM output: {0}")]
    MalformedOutput(String),

    #[error("LLM returned no content")]
    EmptyResponse,

    #[error("No API key available: {0}")]
    MissingApiKey(String),
}

#[derive(Error, Debug, Clone)]
pub enum SheetError {
    #[error("Failed to load rows from '{sheet}': {reason}")]
    Load { sheet: String, reason: String },

    #[error("Failed to write {count} cell updates: {reason}")]
    Write { count: usize, reason: String },

    #[error("Failed to create backup: {0}")]
    Backup(String),

    #[error("Spreadsheet rate limit still exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SheetlocError>;
