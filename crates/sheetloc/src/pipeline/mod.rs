pub mod config;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;
pub mod state;

mod proofread;
mod review;
mod translate;
mod write_set;

pub use config::PipelineConfig;
pub use context::{LanguageTarget, RunContext};
pub use error::PipelineError;
pub use progress::{
    ChunkProgress, EventSink, NoopSink, OriginalRow, PipelineEvent, Progress, RecordingSink,
};
pub use runner::Pipeline;
pub use state::{PipelineState, RunRequest, RunState, Stage, StatePatch};

use crate::batch::Batcher;
use crate::llm::LlmGateway;

/// What a stage may touch besides the state: settings and the model.
pub(crate) struct StageEnv<'a> {
    pub config: &'a PipelineConfig,
    pub gateway: &'a dyn LlmGateway,
}

impl StageEnv<'_> {
    pub fn batcher<'s>(&'s self, sink: &'s dyn EventSink) -> Batcher<'s> {
        Batcher::new(
            self.gateway,
            sink,
            self.config.chunk_size,
            self.config.llm_timeout,
        )
    }
}
