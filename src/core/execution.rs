use crate::core::{BatchError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Created,
    Starting,
    Started,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Whether a run in this state is resumed by the next launch. Runs left
    /// `Started` by a crashed process count as interrupted.
    pub fn is_restartable(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Terminal error of a failed execution and where in the input it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub position: u64,
}

impl FailureInfo {
    pub fn from_error(error: &BatchError, position: u64) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            position,
        }
    }
}

/// Per-record counters as of the last committed chunk. Records read after
/// it are read again on restart, so a resumed step starts from these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub read_count: u64,
    pub skip_count: u64,
    pub filter_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: u64,
    pub job_execution_id: u64,
    pub job_name: String,
    pub name: String,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub filter_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Source position after the last committed chunk.
    pub restart_position: u64,
    #[serde(default)]
    pub checkpoint: Checkpoint,
    pub failure: Option<FailureInfo>,
}

impl StepExecution {
    pub fn new(id: u64, job_execution_id: u64, job_name: &str, name: &str) -> Self {
        Self {
            id,
            job_execution_id,
            job_name: job_name.to_string(),
            name: name.to_string(),
            status: BatchStatus::Created,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            start_time: None,
            end_time: None,
            restart_position: 0,
            checkpoint: Checkpoint::default(),
            failure: None,
        }
    }

    /// Records that everything up to `position` is committed.
    pub fn checkpoint_at(&mut self, position: u64) {
        self.restart_position = position;
        self.checkpoint = Checkpoint {
            read_count: self.read_count,
            skip_count: self.skip_count,
            filter_count: self.filter_count,
        };
    }

    /// Carries counters and restart position over from an interrupted run.
    pub fn resume_from(&mut self, previous: &StepExecution) {
        self.read_count = previous.checkpoint.read_count;
        self.skip_count = previous.checkpoint.skip_count;
        self.filter_count = previous.checkpoint.filter_count;
        self.write_count = previous.write_count;
        self.commit_count = previous.commit_count;
        self.rollback_count = previous.rollback_count;
        self.restart_position = previous.restart_position;
        self.checkpoint = previous.checkpoint;
    }

    pub fn mark_starting(&mut self) {
        self.status = BatchStatus::Starting;
        self.start_time = Some(Utc::now());
    }

    pub fn mark_started(&mut self) {
        self.status = BatchStatus::Started;
    }

    pub fn complete(&mut self) {
        self.finish(BatchStatus::Completed);
    }

    pub fn stop(&mut self) {
        self.finish(BatchStatus::Stopped);
    }

    pub fn fail(&mut self, error: &BatchError, position: u64) {
        self.failure = Some(FailureInfo::from_error(error, position));
        self.finish(BatchStatus::Failed);
    }

    fn finish(&mut self, status: BatchStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: u64,
    pub job_name: String,
    /// Increments per job name; every launch, restarts included, gets a new one.
    pub run_id: u64,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Position of the step that stopped or failed, if any.
    pub restart_position: u64,
    pub failure: Option<FailureInfo>,
}

impl JobExecution {
    pub fn new(id: u64, job_name: &str, run_id: u64) -> Self {
        Self {
            id,
            job_name: job_name.to_string(),
            run_id,
            status: BatchStatus::Created,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            start_time: None,
            end_time: None,
            restart_position: 0,
            failure: None,
        }
    }

    /// Derives status and totals from the step executions of this run.
    ///
    /// `total_steps` is the number of steps the job defines; a run where
    /// fewer steps finished is only `Completed` if every defined step did.
    pub fn aggregate(&mut self, steps: &[StepExecution], total_steps: usize) {
        self.read_count = steps.iter().map(|s| s.read_count).sum();
        self.write_count = steps.iter().map(|s| s.write_count).sum();
        self.skip_count = steps.iter().map(|s| s.skip_count).sum();

        let unfinished = steps
            .iter()
            .find(|s| s.status != BatchStatus::Completed);

        self.status = match unfinished {
            Some(step) if step.status == BatchStatus::Stopped => BatchStatus::Stopped,
            Some(_) => BatchStatus::Failed,
            None if steps.len() >= total_steps => BatchStatus::Completed,
            None => BatchStatus::Failed,
        };
        self.restart_position = unfinished.map(|s| s.restart_position).unwrap_or(0);
        self.failure = unfinished.and_then(|s| s.failure.clone());
        self.end_time = Some(Utc::now());
    }
}
