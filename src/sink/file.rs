use crate::core::{BatchError, Record, Result, Sink, TransactionScope};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Appends encoded lines to a file only when a transaction commits.
struct StagedFile {
    file_path: String,
    writer: Option<BufWriter<tokio::fs::File>>,
    staged: Option<Vec<String>>,
    is_empty: bool,
}

impl StagedFile {
    fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_string_lossy().into_owned(),
            writer: None,
            staged: None,
            is_empty: true,
        }
    }

    async fn open(&mut self, resuming: bool) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resuming)
            .truncate(!resuming)
            .open(&self.file_path)
            .await
            .map_err(|e| BatchError::Sink(format!("{}: {}", self.file_path, e)))?;
        self.is_empty = file.metadata().await?.len() == 0;
        self.writer = Some(BufWriter::new(file));
        debug!(path = %self.file_path, resuming, "Opened file sink");
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(BatchError::Sink("transaction already open".to_string()));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    fn stage(&mut self, line: String) -> Result<()> {
        self.staged
            .as_mut()
            .ok_or_else(|| BatchError::Sink("write outside a transaction".to_string()))?
            .push(line);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| BatchError::Sink("no open transaction".to_string()))?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BatchError::Sink(format!("{} is not open", self.file_path)))?;

        let mut chunk = String::new();
        for line in staged {
            chunk.push_str(&line);
            chunk.push('\n');
        }
        writer
            .write_all(chunk.as_bytes())
            .await
            .map_err(|e| BatchError::Sink(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| BatchError::Sink(e.to_string()))?;
        if !chunk.is_empty() {
            self.is_empty = false;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.staged = None;
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(ref mut writer) = self.writer {
            writer.flush().await?;
        }
        self.writer = None;
        Ok(())
    }
}

pub struct CsvFileSink {
    file: StagedFile,
    delimiter: u8,
    headers: Vec<String>,
}

impl CsvFileSink {
    /// `headers` fixes the column order; a header line is written when the
    /// file starts empty.
    pub fn new<P: AsRef<Path>>(file_path: P, headers: Vec<String>) -> Self {
        Self {
            file: StagedFile::new(file_path),
            delimiter: b',',
            headers,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn encode<I, S>(&self, values: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer
            .write_record(values)
            .map_err(|e| BatchError::Sink(e.to_string()))?;
        let bytes = writer
            .into_inner()
            .map_err(|e| BatchError::Sink(e.to_string()))?;
        let line = String::from_utf8(bytes).map_err(|e| BatchError::Sink(e.to_string()))?;
        Ok(line.trim_end_matches('\n').to_string())
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl TransactionScope for CsvFileSink {
    async fn begin(&mut self) -> Result<()> {
        self.file.begin()?;
        if self.file.is_empty && !self.headers.is_empty() {
            let header = self.encode(&self.headers)?;
            self.file.stage(header)?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.file.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.file.rollback();
        Ok(())
    }
}

#[async_trait]
impl Sink for CsvFileSink {
    async fn open(&mut self, resuming: bool) -> Result<()> {
        self.file.open(resuming).await
    }

    async fn write(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            let values: Vec<String> = self
                .headers
                .iter()
                .map(|key| render(record.get_field(key)))
                .collect();
            let line = self.encode(&values)?;
            self.file.stage(line)?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.file.close().await
    }
}

pub struct JsonLinesSink {
    file: StagedFile,
}

impl JsonLinesSink {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file: StagedFile::new(file_path),
        }
    }
}

#[async_trait]
impl TransactionScope for JsonLinesSink {
    async fn begin(&mut self) -> Result<()> {
        self.file.begin()
    }

    async fn commit(&mut self) -> Result<()> {
        self.file.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.file.rollback();
        Ok(())
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn open(&mut self, resuming: bool) -> Result<()> {
        self.file.open(resuming).await
    }

    async fn write(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            let json_line = serde_json::to_string(&record.data)?;
            self.file.stage(json_line)?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.file.close().await
    }
}
