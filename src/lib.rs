pub mod chunk;
pub mod config;
pub mod core;
pub mod job;
pub mod repository;
pub mod sink;
pub mod source;
pub mod step;
pub mod transform;

pub use crate::chunk::{ChunkExecutor, ChunkOutcome, ChunkPolicy};
pub use crate::config::BatchConfig;
pub use crate::core::*;
pub use crate::job::{Job, JobBuilder};
pub use crate::repository::{ExecutionRepository, FileExecutionRepository, InMemoryExecutionRepository};
pub use crate::step::{Step, StepBuilder};
