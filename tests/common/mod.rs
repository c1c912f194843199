#![allow(dead_code)]

use async_trait::async_trait;
use chunkbatch::sink::{MemorySink, MemoryTable};
use chunkbatch::{
    BatchError, BatchStatus, ExecutionRepository, InMemoryExecutionRepository, JobExecution,
    Record, Result, Sink, StepExecution, TransactionScope,
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn records(n: i64) -> Vec<Record> {
    (1..=n)
        .map(|i| [("id", Value::from(i))].into_iter().collect())
        .collect()
}

pub fn ids(table: &MemoryTable) -> Vec<i64> {
    table
        .rows()
        .iter()
        .filter_map(|r| r.get_field("id").and_then(Value::as_i64))
        .collect()
}

#[derive(Clone, Default)]
pub struct SinkCalls {
    pub begins: Arc<AtomicUsize>,
    pub failed_writes: Arc<AtomicUsize>,
}

impl SinkCalls {
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn failed_writes(&self) -> usize {
        self.failed_writes.load(Ordering::SeqCst)
    }
}

/// Memory sink that rejects the `fail_chunk`-th chunk (1-based, counting
/// committed chunks) `failures` times. Each rejected write stages part of the
/// chunk first so a missing rollback would be visible.
pub struct FlakySink {
    inner: MemorySink,
    fail_chunk: usize,
    failures: usize,
    calls: SinkCalls,
}

impl FlakySink {
    pub fn new(table: MemoryTable, fail_chunk: usize, failures: usize) -> Self {
        Self {
            inner: MemorySink::new(table),
            fail_chunk,
            failures,
            calls: SinkCalls::default(),
        }
    }

    pub fn reliable(table: MemoryTable) -> Self {
        Self::new(table, 0, 0)
    }

    pub fn calls(&self) -> SinkCalls {
        self.calls.clone()
    }
}

#[async_trait]
impl TransactionScope for FlakySink {
    async fn begin(&mut self) -> Result<()> {
        self.calls.begins.fetch_add(1, Ordering::SeqCst);
        self.inner.begin().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl Sink for FlakySink {
    async fn write(&mut self, records: &[Record]) -> Result<()> {
        let chunk_index = self.inner.table().chunk_sizes().len() + 1;
        if chunk_index == self.fail_chunk && self.failures > 0 {
            self.failures -= 1;
            self.calls.failed_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write(&records[..1]).await?;
            return Err(BatchError::Sink(format!("chunk {} rejected", chunk_index)));
        }
        self.inner.write(records).await
    }
}

/// In-memory repository that rejects selected writes.
#[derive(Default)]
pub struct FaultyRepository {
    pub inner: InMemoryExecutionRepository,
    /// Step updates carrying this status are rejected.
    pub reject_step_status: Option<BatchStatus>,
    pub reject_step_create: bool,
}

fn rejected(what: &str) -> BatchError {
    BatchError::Repository(format!("{} rejected", what))
}

#[async_trait]
impl ExecutionRepository for FaultyRepository {
    async fn create_job_execution(&self, job_name: &str) -> Result<JobExecution> {
        self.inner.create_job_execution(job_name).await
    }

    async fn update_job_execution(&self, execution: &JobExecution) -> Result<()> {
        self.inner.update_job_execution(execution).await
    }

    async fn create_step_execution(
        &self,
        job_execution: &JobExecution,
        step_name: &str,
    ) -> Result<StepExecution> {
        if self.reject_step_create {
            return Err(rejected("step creation"));
        }
        self.inner.create_step_execution(job_execution, step_name).await
    }

    async fn update_step_execution(&self, execution: &StepExecution) -> Result<()> {
        if self.reject_step_status == Some(execution.status) {
            return Err(rejected("step update"));
        }
        self.inner.update_step_execution(execution).await
    }

    async fn latest_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>> {
        self.inner.latest_job_execution(job_name).await
    }

    async fn job_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
        self.inner.job_executions(job_name).await
    }

    async fn step_executions(&self, job_execution_id: u64) -> Result<Vec<StepExecution>> {
        self.inner.step_executions(job_execution_id).await
    }
}
