use crate::core::{BatchError, BatchStatus, FailureInfo, JobExecution, Result, StepExecution};
use crate::repository::ExecutionRepository;
use crate::step::Step;
use chrono::Utc;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Ordered steps over one dataset pass.
pub struct Job {
    name: String,
    steps: Vec<Step>,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Launches a new run.
    ///
    /// If the latest run of this job did not complete, the new run is a
    /// restart: steps that completed in that run are not executed again and
    /// the first unfinished step resumes from its restart position. Steps
    /// after a failed or stopped step do not run.
    pub async fn run(
        &mut self,
        repository: &dyn ExecutionRepository,
        cancel: &CancellationToken,
    ) -> Result<JobExecution> {
        let previous = self.previous_steps(repository).await?;

        let mut execution = repository.create_job_execution(&self.name).await?;
        execution.status = BatchStatus::Starting;
        execution.start_time = Some(Utc::now());
        repository.update_job_execution(&execution).await?;

        info!(
            job = %self.name,
            run_id = execution.run_id,
            restart = previous.is_some(),
            steps = self.steps.len(),
            "Job starting"
        );

        execution.status = BatchStatus::Started;
        if let Err(e) = repository.update_job_execution(&execution).await {
            warn!(job = %self.name, error = %e, "Failed to persist job execution");
        }

        let total_steps = self.steps.len();
        let mut finished: Vec<StepExecution> = Vec::with_capacity(total_steps);
        for step in &mut self.steps {
            let prior = previous.as_ref().and_then(|p| p.get(step.name()));
            if let Some(prior) = prior.filter(|p| p.status == BatchStatus::Completed) {
                info!(job = %self.name, step = %step.name(), "Step already completed; skipping");
                finished.push(prior.clone());
                continue;
            }

            let step_execution = match step.execute(&execution, prior, repository, cancel).await {
                Ok(step_execution) => step_execution,
                Err(e) => {
                    error!(job = %self.name, step = %step.name(), error = %e, "Step could not be launched");
                    execution.status = BatchStatus::Failed;
                    execution.failure = Some(FailureInfo::from_error(&e, 0));
                    execution.end_time = Some(Utc::now());
                    if let Err(e) = repository.update_job_execution(&execution).await {
                        error!(job = %self.name, error = %e, "Failed to persist job execution");
                    }
                    return Err(e);
                }
            };
            let status = step_execution.status;
            finished.push(step_execution);
            if status != BatchStatus::Completed {
                break;
            }
        }

        execution.aggregate(&finished, total_steps);
        match execution.status {
            BatchStatus::Completed => info!(
                job = %self.name,
                run_id = execution.run_id,
                read_count = execution.read_count,
                write_count = execution.write_count,
                skip_count = execution.skip_count,
                "Job completed"
            ),
            status => error!(
                job = %self.name,
                run_id = execution.run_id,
                %status,
                restart_position = execution.restart_position,
                failure = ?execution.failure,
                "Job did not complete"
            ),
        }

        if let Err(e) = repository.update_job_execution(&execution).await {
            error!(job = %self.name, error = %e, "Failed to persist final job execution");
        }
        Ok(execution)
    }

    /// Latest execution of each step since the last completed run, when the
    /// most recent run did not complete.
    async fn previous_steps(
        &self,
        repository: &dyn ExecutionRepository,
    ) -> Result<Option<HashMap<String, StepExecution>>> {
        let runs = repository.job_executions(&self.name).await?;
        let Some(latest) = runs.last() else {
            return Ok(None);
        };
        if !latest.status.is_restartable() {
            return Ok(None);
        }

        // A restarted run only records the steps it executed, so earlier
        // interrupted runs are consulted for steps it skipped.
        let mut by_name: HashMap<String, StepExecution> = HashMap::new();
        for run in runs.iter().rev() {
            if run.status == BatchStatus::Completed {
                break;
            }
            for step in repository.step_executions(run.id).await? {
                by_name.entry(step.name.clone()).or_insert(step);
            }
        }
        info!(
            job = %self.name,
            run_id = latest.run_id,
            status = %latest.status,
            "Restarting after interrupted run"
        );
        Ok(Some(by_name))
    }
}

pub struct JobBuilder {
    name: String,
    steps: Vec<Step>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn build(self) -> Result<Job> {
        if self.name.trim().is_empty() {
            return Err(BatchError::Config("job name must not be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(BatchError::Config(format!("job '{}' has no steps", self.name)));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if self.steps[..i].iter().any(|s| s.name() == step.name()) {
                return Err(BatchError::Config(format!(
                    "job '{}' has duplicate step '{}'",
                    self.name,
                    step.name()
                )));
            }
        }
        Ok(Job {
            name: self.name,
            steps: self.steps,
        })
    }
}

/// Runs independent jobs concurrently, each on its own task-local state.
/// Jobs must have distinct names when they share a repository.
pub async fn run_all(
    jobs: &mut [Job],
    repository: &dyn ExecutionRepository,
    cancel: &CancellationToken,
) -> Vec<Result<JobExecution>> {
    futures::future::join_all(jobs.iter_mut().map(|job| job.run(repository, cancel))).await
}
