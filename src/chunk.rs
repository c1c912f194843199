//! Chunk-oriented read → transform → write loop.
//!
//! Records are pulled one at a time, transformed, and buffered. When the
//! buffer reaches the chunk size, or the source is exhausted, the buffer is
//! written to the sink inside one transaction. Filtered and skipped records
//! never occupy a buffer slot, so chunk boundaries depend only on the number
//! of successfully transformed records.

use crate::core::{
    BatchError, ItemSource, Record, Result, Sink, StepExecution, Transform,
};
use crate::repository::ExecutionRepository;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    /// Extra attempts for a chunk whose write or commit failed.
    pub retry_limit: u32,
    /// Per-record failures tolerated before the step fails.
    pub skip_limit: u64,
}

impl ChunkPolicy {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            retry_limit: 0,
            skip_limit: 0,
        }
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_skip_limit(mut self, skip_limit: u64) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(BatchError::Config("chunk size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}

/// How the loop ended when no error escaped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Exhausted,
    Stopped,
}

pub struct ChunkExecutor<'a> {
    policy: ChunkPolicy,
    repository: &'a dyn ExecutionRepository,
    cancel: &'a CancellationToken,
}

impl<'a> ChunkExecutor<'a> {
    pub fn new(
        policy: ChunkPolicy,
        repository: &'a dyn ExecutionRepository,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            policy,
            repository,
            cancel,
        }
    }

    /// Drives an opened source to exhaustion or until cancelled.
    ///
    /// Counters and the restart position are updated on `execution` as chunks
    /// commit, and the execution is persisted after every commit. On error the
    /// in-flight chunk has been rolled back and everything committed before it
    /// stays committed; the caller decides the final status.
    pub async fn run(
        &self,
        source: &mut dyn ItemSource,
        transform: &dyn Transform,
        sink: &mut dyn Sink,
        execution: &mut StepExecution,
    ) -> Result<ChunkOutcome> {
        self.policy.validate()?;
        let mut buffer: Vec<Record> = Vec::with_capacity(self.policy.chunk_size);

        loop {
            if self.cancel.is_cancelled() {
                info!(
                    step = %execution.name,
                    position = execution.restart_position,
                    "Stop requested; ending before next chunk"
                );
                return Ok(ChunkOutcome::Stopped);
            }

            let exhausted = self.fill(source, transform, execution, &mut buffer).await?;
            if !buffer.is_empty() {
                self.commit(sink, &buffer, execution, source.position())
                    .await?;
                buffer.clear();
            }
            if exhausted {
                execution.checkpoint_at(source.position());
                return Ok(ChunkOutcome::Exhausted);
            }
        }
    }

    /// Reads until the buffer holds a full chunk. Returns `true` when the
    /// source ran out first.
    async fn fill(
        &self,
        source: &mut dyn ItemSource,
        transform: &dyn Transform,
        execution: &mut StepExecution,
        buffer: &mut Vec<Record>,
    ) -> Result<bool> {
        while buffer.len() < self.policy.chunk_size {
            let record = match source.read().await {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(true),
                Err(e) => {
                    if e.is_skippable() {
                        execution.read_count += 1;
                    }
                    self.skip_or_fail(e, execution)?;
                    continue;
                }
            };
            execution.read_count += 1;

            match transform.transform(record).await {
                Ok(Some(out)) => buffer.push(out),
                Ok(None) => execution.filter_count += 1,
                Err(e) => self.skip_or_fail(e, execution)?,
            }
        }
        Ok(false)
    }

    fn skip_or_fail(&self, error: BatchError, execution: &mut StepExecution) -> Result<()> {
        if !error.is_skippable() {
            return Err(error);
        }
        if execution.skip_count >= self.policy.skip_limit {
            error!(
                step = %execution.name,
                skip_limit = self.policy.skip_limit,
                error = %error,
                "Skip limit exceeded"
            );
            return Err(error);
        }
        execution.skip_count += 1;
        warn!(
            step = %execution.name,
            skip_count = execution.skip_count,
            error = %error,
            "Skipping record"
        );
        Ok(())
    }

    /// Writes one chunk in a transaction, retrying the same records on failure.
    async fn commit(
        &self,
        sink: &mut dyn Sink,
        chunk: &[Record],
        execution: &mut StepExecution,
        position: u64,
    ) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match write_in_transaction(sink, chunk).await {
                Ok(()) => break,
                Err(e) => {
                    execution.rollback_count += 1;
                    if attempt >= self.policy.retry_limit {
                        error!(
                            step = %execution.name,
                            chunk_len = chunk.len(),
                            attempts = attempt + 1,
                            error = %e,
                            "Chunk write failed; retries exhausted"
                        );
                        return Err(e);
                    }
                    attempt += 1;
                    warn!(
                        step = %execution.name,
                        chunk_len = chunk.len(),
                        attempt,
                        error = %e,
                        "Chunk write failed; retrying"
                    );
                }
            }
        }

        execution.write_count += chunk.len() as u64;
        execution.commit_count += 1;
        execution.checkpoint_at(position);
        debug!(
            step = %execution.name,
            chunk_len = chunk.len(),
            write_count = execution.write_count,
            position,
            "Chunk committed"
        );

        self.repository
            .update_step_execution(execution)
            .await
            .inspect_err(|e| {
                error!(step = %execution.name, error = %e, "Failed to persist step execution after commit");
            })
    }
}

/// One attempt: begin, write, commit. Any failure rolls the transaction back.
async fn write_in_transaction(sink: &mut dyn Sink, chunk: &[Record]) -> Result<()> {
    sink.begin().await?;
    let written = match sink.write(chunk).await {
        Ok(()) => sink.commit().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(rollback_err) = sink.rollback().await {
            warn!(error = %rollback_err, "Rollback failed");
        }
        return Err(e);
    }
    Ok(())
}
