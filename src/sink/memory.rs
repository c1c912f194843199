use crate::core::{BatchError, Record, Result, Sink, TransactionScope};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct TableState {
    rows: Vec<Record>,
    chunk_sizes: Vec<usize>,
}

/// Shared in-memory destination. Clones observe the same committed rows.
#[derive(Clone, Default)]
pub struct MemoryTable {
    state: Arc<Mutex<TableState>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Record> {
        self.state.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sizes of committed chunks in commit order.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.state.lock().chunk_sizes.clone()
    }

    fn append(&self, mut records: Vec<Record>) {
        let mut state = self.state.lock();
        state.chunk_sizes.push(records.len());
        state.rows.append(&mut records);
    }
}

pub struct MemorySink {
    table: MemoryTable,
    staged: Option<Vec<Record>>,
}

impl MemorySink {
    pub fn new(table: MemoryTable) -> Self {
        Self {
            table,
            staged: None,
        }
    }

    pub fn table(&self) -> &MemoryTable {
        &self.table
    }
}

#[async_trait]
impl TransactionScope for MemorySink {
    async fn begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(BatchError::Sink("transaction already open".to_string()));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| BatchError::Sink("no open transaction".to_string()))?;
        self.table.append(staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.staged = None;
        Ok(())
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write(&mut self, records: &[Record]) -> Result<()> {
        let staged = self
            .staged
            .as_mut()
            .ok_or_else(|| BatchError::Sink("write outside a transaction".to_string()))?;
        staged.extend_from_slice(records);
        Ok(())
    }
}
