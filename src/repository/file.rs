use super::{ExecutionRepository, ExecutionStore};
use crate::core::{BatchError, JobExecution, Result, StepExecution};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One line of the execution log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LogEntry {
    Job(JobExecution),
    Step(StepExecution),
}

struct Inner {
    store: ExecutionStore,
    writer: File,
}

/// Repository backed by an append-only JSON lines file. Every create or
/// update appends a snapshot; on open the log is replayed and the last
/// snapshot of each execution wins. An execution enters the in-memory index
/// only after its snapshot reached the log.
pub struct FileExecutionRepository {
    path: PathBuf,
    inner: Mutex<Inner>,
}

fn repo_error(path: &Path, e: impl std::fmt::Display) -> BatchError {
    BatchError::Repository(format!("{}: {}", path.display(), e))
}

impl FileExecutionRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| repo_error(parent, e))?;
        }

        let mut store = ExecutionStore::default();
        let mut replayed = 0usize;
        let mut torn_tail = false;
        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| repo_error(&path, e))?;
            torn_tail = !content.is_empty() && !content.ends_with('\n');
            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogEntry>(line) {
                    Ok(LogEntry::Job(job)) => store.put_job(job),
                    Ok(LogEntry::Step(step)) => store.put_step(step),
                    // A torn final line from a crash mid-append is dropped.
                    Err(e) => {
                        warn!(path = %path.display(), line = index + 1, error = %e, "Skipping unreadable execution log entry");
                        continue;
                    }
                }
                replayed += 1;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| repo_error(&path, e))?;
        if torn_tail {
            file.write_all(b"\n").map_err(|e| repo_error(&path, e))?;
        }

        info!(path = %path.display(), entries = replayed, "Execution repository opened");

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                store,
                writer: File::from_std(file),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, inner: &mut Inner, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        inner
            .writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| repo_error(&self.path, e))?;
        inner
            .writer
            .flush()
            .await
            .map_err(|e| repo_error(&self.path, e))
    }
}

#[async_trait]
impl ExecutionRepository for FileExecutionRepository {
    async fn create_job_execution(&self, job_name: &str) -> Result<JobExecution> {
        let mut inner = self.inner.lock().await;
        let execution = inner.store.draft_job(job_name);
        self.append(&mut inner, &LogEntry::Job(execution.clone())).await?;
        inner.store.put_job(execution.clone());
        Ok(execution)
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.store.has_job(execution.id) {
            return Err(BatchError::Repository(format!(
                "unknown job execution {}",
                execution.id
            )));
        }
        self.append(&mut inner, &LogEntry::Job(execution.clone())).await?;
        inner.store.put_job(execution.clone());
        Ok(())
    }

    async fn create_step_execution(
        &self,
        job_execution: &JobExecution,
        step_name: &str,
    ) -> Result<StepExecution> {
        let mut inner = self.inner.lock().await;
        let execution = inner.store.draft_step(job_execution, step_name);
        self.append(&mut inner, &LogEntry::Step(execution.clone())).await?;
        inner.store.put_step(execution.clone());
        Ok(execution)
    }

    async fn update_step_execution(&self, execution: &StepExecution) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.store.has_step(execution.id) {
            return Err(BatchError::Repository(format!(
                "unknown step execution {}",
                execution.id
            )));
        }
        self.append(&mut inner, &LogEntry::Step(execution.clone())).await?;
        inner.store.put_step(execution.clone());
        Ok(())
    }

    async fn latest_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>> {
        Ok(self.inner.lock().await.store.latest_job(job_name))
    }

    async fn job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
        Ok(self.inner.lock().await.store.jobs_named(job_name))
    }

    async fn step_executions(&self, job_execution_id: u64) -> Result<Vec<StepExecution>> {
        Ok(self.inner.lock().await.store.steps_of(job_execution_id))
    }
}
