use super::{ExecutionRepository, ExecutionStore};
use crate::core::{BatchError, JobExecution, Result, StepExecution};
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct InMemoryExecutionRepository {
    store: Mutex<ExecutionStore>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_job_execution(&self, job_name: &str) -> Result<JobExecution> {
        let mut store = self.store.lock();
        let execution = store.draft_job(job_name);
        store.put_job(execution.clone());
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> Result<()> {
        let mut store = self.store.lock();
        if !store.has_job(execution.id) {
            return Err(BatchError::Repository(format!(
                "unknown job execution {}",
                execution.id
            )));
        }
        store.put_job(execution.clone());
        Ok(())
    }

    async fn create_step_execution(
        &self,
        job_execution: &JobExecution,
        step_name: &str,
    ) -> Result<StepExecution> {
        let mut store = self.store.lock();
        let execution = store.draft_step(job_execution, step_name);
        store.put_step(execution.clone());
        Ok(execution)
    }

    async fn update_step_execution(&self, execution: &StepExecution) -> Result<()> {
        let mut store = self.store.lock();
        if !store.has_step(execution.id) {
            return Err(BatchError::Repository(format!(
                "unknown step execution {}",
                execution.id
            )));
        }
        store.put_step(execution.clone());
        Ok(())
    }

    async fn latest_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>> {
        Ok(self.store.lock().latest_job(job_name))
    }

    async fn job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
        Ok(self.store.lock().jobs_named(job_name))
    }

    async fn step_executions(&self, job_execution_id: u64) -> Result<Vec<StepExecution>> {
        Ok(self.store.lock().steps_of(job_execution_id))
    }
}
