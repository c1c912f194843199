use crate::core::{Record, Result};
use async_trait::async_trait;

/// Forward-only reader over a finite input.
#[async_trait]
pub trait ItemSource: Send {
    /// Opens the underlying resource, skipping the first `restart_position`
    /// items. A resource that cannot be opened yields
    /// [`BatchError::SourceUnavailable`](crate::BatchError::SourceUnavailable).
    async fn open(&mut self, restart_position: u64) -> Result<()>;

    /// Next record, or `None` once the input is exhausted. A
    /// [`BatchError::Parse`](crate::BatchError::Parse) consumes the offending
    /// item; reading may continue afterwards.
    async fn read(&mut self) -> Result<Option<Record>>;

    /// Number of items consumed since the start of the input.
    fn position(&self) -> u64;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Maps one record to zero or one record. `Ok(None)` filters the record out.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, record: Record) -> Result<Option<Record>>;
}

#[async_trait]
pub trait TransactionScope: Send {
    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Destination for whole chunks. Records passed to [`Sink::write`] become
/// visible when the surrounding transaction commits and never otherwise.
#[async_trait]
pub trait Sink: TransactionScope {
    /// `resuming` is set when a restarted step continues after previously
    /// committed chunks.
    async fn open(&mut self, _resuming: bool) -> Result<()> {
        Ok(())
    }

    async fn write(&mut self, records: &[Record]) -> Result<()>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
