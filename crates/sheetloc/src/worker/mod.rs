pub mod job;
pub mod pool;

pub use job::{JobKind, SessionJob};
pub use pool::{JobHandler, WorkerPool};
