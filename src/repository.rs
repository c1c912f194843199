//! Persistence of job and step execution records.
//!
//! Job executions are keyed by `(job name, run id)`. New runs are appended
//! with the next run id; earlier runs are never rewritten by a later one.

pub mod file;
pub mod memory;

use crate::core::{JobExecution, Result, StepExecution};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub use self::file::FileExecutionRepository;
pub use self::memory::InMemoryExecutionRepository;

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Allocates a new run of `job_name` in the `Created` state.
    async fn create_job_execution(&self, job_name: &str) -> Result<JobExecution>;

    async fn update_job_execution(&self, execution: &JobExecution) -> Result<()>;

    /// Allocates a step execution belonging to `job_execution`.
    async fn create_step_execution(
        &self,
        job_execution: &JobExecution,
        step_name: &str,
    ) -> Result<StepExecution>;

    async fn update_step_execution(&self, execution: &StepExecution) -> Result<()>;

    /// Most recent run of `job_name`, if any.
    async fn latest_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>>;

    /// All runs of `job_name`, oldest first.
    async fn job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>>;

    /// Step executions of one run, in creation order.
    async fn step_executions(&self, job_execution_id: u64) -> Result<Vec<StepExecution>>;
}

/// Index shared by the repository implementations.
#[derive(Debug, Default)]
pub(crate) struct ExecutionStore {
    next_id: u64,
    jobs: BTreeMap<u64, JobExecution>,
    steps: BTreeMap<u64, StepExecution>,
}

impl ExecutionStore {
    /// Next job execution of `job_name`. Nothing is registered until it is
    /// passed to [`put_job`](Self::put_job).
    pub(crate) fn draft_job(&self, job_name: &str) -> JobExecution {
        let run_id = self
            .jobs
            .values()
            .filter(|j| j.job_name == job_name)
            .map(|j| j.run_id)
            .max()
            .unwrap_or(0)
            + 1;
        JobExecution::new(self.next_id + 1, job_name, run_id)
    }

    pub(crate) fn draft_step(&self, job: &JobExecution, step_name: &str) -> StepExecution {
        StepExecution::new(self.next_id + 1, job.id, &job.job_name, step_name)
    }

    pub(crate) fn put_job(&mut self, execution: JobExecution) {
        self.next_id = self.next_id.max(execution.id);
        self.jobs.insert(execution.id, execution);
    }

    pub(crate) fn put_step(&mut self, execution: StepExecution) {
        self.next_id = self.next_id.max(execution.id);
        self.steps.insert(execution.id, execution);
    }

    pub(crate) fn has_job(&self, id: u64) -> bool {
        self.jobs.contains_key(&id)
    }

    pub(crate) fn has_step(&self, id: u64) -> bool {
        self.steps.contains_key(&id)
    }

    pub(crate) fn latest_job(&self, job_name: &str) -> Option<JobExecution> {
        self.jobs
            .values()
            .filter(|j| j.job_name == job_name)
            .max_by_key(|j| j.run_id)
            .cloned()
    }

    pub(crate) fn jobs_named(&self, job_name: &str) -> Vec<JobExecution> {
        let mut jobs: Vec<JobExecution> = self
            .jobs
            .values()
            .filter(|j| j.job_name == job_name)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.run_id);
        jobs
    }

    pub(crate) fn steps_of(&self, job_execution_id: u64) -> Vec<StepExecution> {
        self.steps
            .values()
            .filter(|s| s.job_execution_id == job_execution_id)
            .cloned()
            .collect()
    }
}
