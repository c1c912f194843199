use crate::core::{BatchError, ItemSource, Record, Result};
use async_trait::async_trait;
use std::collections::VecDeque;

/// One item of a [`MemorySource`]: a record, or an error the source reports
/// in its place.
#[derive(Debug, Clone)]
pub enum MemoryItem {
    Record(Record),
    ParseError(String),
}

/// Source over items held in memory. Useful for tests and for feeding
/// records produced by an earlier step.
pub struct MemorySource {
    items: Vec<MemoryItem>,
    pending: VecDeque<MemoryItem>,
    position: u64,
    available: bool,
}

impl MemorySource {
    pub fn new(items: Vec<MemoryItem>) -> Self {
        Self {
            items,
            pending: VecDeque::new(),
            position: 0,
            available: true,
        }
    }

    pub fn from_records<I: IntoIterator<Item = Record>>(records: I) -> Self {
        Self::new(records.into_iter().map(MemoryItem::Record).collect())
    }

    /// A source whose `open` always fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Vec::new())
        }
    }
}

#[async_trait]
impl ItemSource for MemorySource {
    async fn open(&mut self, restart_position: u64) -> Result<()> {
        if !self.available {
            return Err(BatchError::SourceUnavailable(
                "in-memory source is unavailable".to_string(),
            ));
        }
        let skip = usize::try_from(restart_position).unwrap_or(usize::MAX);
        self.pending = self.items.iter().skip(skip).cloned().collect();
        self.position = restart_position.min(self.items.len() as u64);
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Record>> {
        match self.pending.pop_front() {
            None => Ok(None),
            Some(item) => {
                self.position += 1;
                match item {
                    MemoryItem::Record(record) => Ok(Some(record)),
                    MemoryItem::ParseError(message) => {
                        Err(BatchError::parse(self.position, message))
                    }
                }
            }
        }
    }

    fn position(&self) -> u64 {
        self.position
    }
}
