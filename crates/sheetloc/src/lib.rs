pub mod batch;
pub mod broadcast;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod secrets;
pub mod session;
pub mod sheet;
pub mod validation;
pub mod worker;

pub use broadcast::{EventHub, EventStream};
pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore};
pub use config::{load_config, load_config_from_str, AppConfig};
pub use error::{ConfigError, LlmError, Result, SheetError, SheetlocError, WorkerError};
pub use llm::{Completion, LlmGateway, OpenAiCompatGateway};
pub use model::{Decision, TranslationMode};
pub use pipeline::{Pipeline, PipelineConfig, PipelineEvent, PipelineState, RunRequest, RunState, Stage};
pub use secrets::{resolve_secret, SecretError};
pub use session::{SessionError, SessionManager, SessionPhase, SessionSnapshot};
pub use sheet::{MemorySheet, SheetClient};
