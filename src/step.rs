use crate::chunk::{ChunkExecutor, ChunkOutcome, ChunkPolicy};
use crate::core::{
    BatchError, BatchStatus, ItemSource, JobExecution, Result, Sink, StepExecution, Transform,
};
use crate::repository::ExecutionRepository;
use crate::transform::Identity;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// A named chunk-oriented unit of work: one source, one transform, one sink.
pub struct Step {
    name: String,
    source: Box<dyn ItemSource>,
    transform: Box<dyn Transform>,
    sink: Box<dyn Sink>,
    policy: ChunkPolicy,
}

impl Step {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &ChunkPolicy {
        &self.policy
    }

    /// Runs the step to a terminal state for `job`.
    ///
    /// `previous` is this step's execution from an interrupted run; when given
    /// the source resumes from its restart position and its counters carry
    /// over. Errors are recorded on the returned execution, never returned,
    /// except when the repository cannot allocate the execution at all.
    pub async fn execute(
        &mut self,
        job: &JobExecution,
        previous: Option<&StepExecution>,
        repository: &dyn ExecutionRepository,
        cancel: &CancellationToken,
    ) -> Result<StepExecution> {
        let mut execution = repository.create_step_execution(job, &self.name).await?;
        if let Some(previous) = previous {
            execution.resume_from(previous);
        }

        let span = info_span!("step", job = %job.job_name, run_id = job.run_id, step = %self.name);
        self.drive(&mut execution, repository, cancel)
            .instrument(span)
            .await;

        if let Err(e) = repository.update_step_execution(&execution).await {
            error!(step = %self.name, error = %e, "Failed to persist final step execution");
        }
        Ok(execution)
    }

    async fn drive(
        &mut self,
        execution: &mut StepExecution,
        repository: &dyn ExecutionRepository,
        cancel: &CancellationToken,
    ) {
        execution.mark_starting();
        if let Err(e) = self.policy.validate() {
            execution.fail(&e, execution.restart_position);
            return;
        }
        persist(execution, repository).await;

        let resume_at = execution.restart_position;
        if let Err(e) = self.source.open(resume_at).await {
            error!(error = %e, "Source could not be opened");
            execution.fail(&e, resume_at);
            return;
        }

        if let Err(e) = self.sink.open(resume_at > 0).await {
            error!(error = %e, "Sink could not be opened");
            execution.fail(&e, resume_at);
            self.close_source().await;
            return;
        }

        execution.mark_started();
        persist(execution, repository).await;
        info!(
            chunk_size = self.policy.chunk_size,
            restart_position = resume_at,
            "Step started"
        );

        let executor = ChunkExecutor::new(self.policy, repository, cancel);
        let outcome = executor
            .run(
                self.source.as_mut(),
                self.transform.as_ref(),
                self.sink.as_mut(),
                execution,
            )
            .await;

        match outcome {
            Ok(ChunkOutcome::Exhausted) => execution.complete(),
            Ok(ChunkOutcome::Stopped) => execution.stop(),
            Err(e) => {
                let position = self.source.position();
                error!(error = %e, position, "Step failed");
                execution.fail(&e, position);
            }
        }

        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "Sink close failed");
            if execution.status == BatchStatus::Completed {
                execution.fail(&e, self.source.position());
            }
        }
        self.close_source().await;

        info!(
            status = %execution.status,
            read_count = execution.read_count,
            write_count = execution.write_count,
            skip_count = execution.skip_count,
            filter_count = execution.filter_count,
            "Step finished"
        );
    }

    async fn close_source(&mut self) {
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Source close failed");
        }
    }
}

async fn persist(execution: &StepExecution, repository: &dyn ExecutionRepository) {
    if let Err(e) = repository.update_step_execution(execution).await {
        warn!(error = %e, status = %execution.status, "Failed to persist step execution");
    }
}

pub struct StepBuilder {
    name: String,
    source: Option<Box<dyn ItemSource>>,
    transform: Box<dyn Transform>,
    sink: Option<Box<dyn Sink>>,
    policy: ChunkPolicy,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            transform: Box::new(Identity),
            sink: None,
            policy: ChunkPolicy::default(),
        }
    }

    pub fn source(mut self, source: impl ItemSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Box::new(transform);
        self
    }

    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.policy.chunk_size = chunk_size;
        self
    }

    pub fn retry_limit(mut self, retry_limit: u32) -> Self {
        self.policy.retry_limit = retry_limit;
        self
    }

    pub fn skip_limit(mut self, skip_limit: u64) -> Self {
        self.policy.skip_limit = skip_limit;
        self
    }

    pub fn policy(mut self, policy: ChunkPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<Step> {
        if self.name.trim().is_empty() {
            return Err(BatchError::Config("step name must not be empty".to_string()));
        }
        self.policy.validate()?;
        let source = self
            .source
            .ok_or_else(|| BatchError::Config(format!("step '{}' has no source", self.name)))?;
        let sink = self
            .sink
            .ok_or_else(|| BatchError::Config(format!("step '{}' has no sink", self.name)))?;
        Ok(Step {
            name: self.name,
            source,
            transform: self.transform,
            sink,
            policy: self.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::repository::InMemoryExecutionRepository;
    use crate::sink::{MemorySink, MemoryTable};
    use crate::source::MemorySource;

    #[test]
    fn builder_requires_source_and_sink() {
        let err = StepBuilder::new("load")
            .sink(MemorySink::new(MemoryTable::new()))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("no source"));

        let err = StepBuilder::new("load")
            .source(MemorySource::from_records(Vec::new()))
            .sink(MemorySink::new(MemoryTable::new()))
            .chunk_size(0)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[tokio::test]
    async fn unavailable_source_fails_without_opening_a_transaction() {
        let repo = InMemoryExecutionRepository::new();
        let job = repo.create_job_execution("job").await.unwrap();
        let table = MemoryTable::new();
        let mut step = StepBuilder::new("load")
            .source(MemorySource::unavailable())
            .sink(MemorySink::new(table.clone()))
            .build()
            .unwrap();

        let execution = step
            .execute(&job, None, &repo, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(
            execution.failure.as_ref().map(|f| f.kind),
            Some(ErrorKind::SourceUnavailable)
        );
        assert_eq!(execution.read_count, 0);
        assert_eq!(execution.commit_count + execution.rollback_count, 0);
        assert!(table.chunk_sizes().is_empty());

        let stored = repo.step_executions(job.id).await.unwrap();
        assert_eq!(stored[0].status, BatchStatus::Failed);
    }
}
