use thiserror::Error;

use super::state::Stage;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Spreadsheet operation failed: {0}")]
    Sheet(#[from] crate::error::SheetError),

    #[error("Configuration problem: {0}")]
    Config(#[from] crate::error::ConfigError),

    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    #[error("Duplicate row key '{0}'")]
    DuplicateKey(String),

    #[error("Language '{0}' is not configured")]
    UnsupportedLanguage(String),

    #[error("Run is not waiting for a decision (stage: {0})")]
    NotSuspended(Stage),

    #[error("Run already finished")]
    AlreadyTerminal,

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Stage '{0}' needs the run context, but context setup has not run")]
    MissingContext(Stage),
}
