use crate::core::{BatchError, ItemSource, Record, Result, Schema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Character sets the delimited reader can decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Ascii => "US-ASCII",
        }
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<String, String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| format!("invalid UTF-8: {}", e)),
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            Encoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(i) => Err(format!("non-ASCII byte 0x{:02x} at offset {}", bytes[i], i)),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
        }
    }
}

impl FromStr for Encoding {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "UTF-8" | "UTF8" => Ok(Encoding::Utf8),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Ok(Encoding::Latin1),
            "US-ASCII" | "ASCII" => Ok(Encoding::Ascii),
            other => Err(BatchError::Config(format!("unsupported encoding '{}'", other))),
        }
    }
}

impl TryFrom<String> for Encoding {
    type Error = BatchError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Encoding> for String {
    fn from(value: Encoding) -> Self {
        value.name().to_string()
    }
}

/// Reads one record per line from a delimited text file.
pub struct DelimitedFileSource {
    file_path: PathBuf,
    schema: Schema,
    delimiter: u8,
    encoding: Encoding,
    skip_lines: usize,
    comment_prefix: Option<String>,
    reader: Option<BufReader<File>>,
    line_number: u64,
    position: u64,
}

impl DelimitedFileSource {
    pub fn new<P: AsRef<Path>>(file_path: P, schema: Schema) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            schema,
            delimiter: b',',
            encoding: Encoding::Utf8,
            skip_lines: 0,
            comment_prefix: None,
            reader: None,
            line_number: 0,
            position: 0,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Lines at the top of the file that are never mapped (headers).
    pub fn with_skip_lines(mut self, skip_lines: usize) -> Self {
        self.skip_lines = skip_lines;
        self
    }

    pub fn with_comment_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.comment_prefix = Some(prefix.into());
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Next physical line as raw bytes without the line terminator.
    async fn next_raw_line(&mut self) -> Result<Option<Vec<u8>>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| BatchError::Source(anyhow::anyhow!("source is not open")))?;

        let mut buf = Vec::new();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        self.line_number += 1;
        if self.line_number == 1 && buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
            buf.drain(..3);
        }
        Ok(Some(buf))
    }

    fn tokenize(&self, line: &str) -> Result<Record> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(line.as_bytes());

        match reader.records().next() {
            Some(Ok(tokens)) => self.schema.map_tokens(tokens.iter(), self.line_number),
            Some(Err(e)) => Err(BatchError::parse(self.line_number, e.to_string())),
            None => Err(BatchError::parse(self.line_number, "no fields on line")),
        }
    }

    fn is_ignorable(&self, line: &str) -> bool {
        line.trim().is_empty()
            || self
                .comment_prefix
                .as_deref()
                .is_some_and(|prefix| line.starts_with(prefix))
    }
}

#[async_trait]
impl ItemSource for DelimitedFileSource {
    async fn open(&mut self, restart_position: u64) -> Result<()> {
        let file = File::open(&self.file_path).await.map_err(|e| {
            BatchError::SourceUnavailable(format!("{}: {}", self.file_path.display(), e))
        })?;
        self.reader = Some(BufReader::new(file));
        self.line_number = 0;
        self.position = 0;

        for _ in 0..self.skip_lines {
            if self.next_raw_line().await?.is_none() {
                break;
            }
        }
        while self.position < restart_position {
            if self.next_raw_line().await?.is_none() {
                break;
            }
            self.position += 1;
        }

        info!(
            path = %self.file_path.display(),
            encoding = self.encoding.name(),
            skip_lines = self.skip_lines,
            restart_position,
            "Opened delimited source"
        );
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(bytes) = self.next_raw_line().await? else {
                return Ok(None);
            };
            self.position += 1;

            let line = self
                .encoding
                .decode(&bytes)
                .map_err(|msg| BatchError::parse(self.line_number, msg))?;
            if self.is_ignorable(&line) {
                debug!(line = self.line_number, "Ignoring blank or comment line");
                continue;
            }
            return self.tokenize(&line).map(Some);
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    async fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Field};
    use serde_json::Value;
    use std::io::Write;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Integer).required(),
            Field::new("name", DataType::String),
        ])
    }

    fn write_input(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    async fn drain(source: &mut DelimitedFileSource) -> Vec<Result<Record>> {
        let mut out = Vec::new();
        loop {
            match source.read().await {
                Ok(None) => break,
                Ok(Some(r)) => out.push(Ok(r)),
                Err(e) => out.push(Err(e)),
            }
        }
        out
    }

    #[tokio::test]
    async fn skips_header_and_reads_quoted_fields() {
        let file = write_input(b"id,name\r\n1,\"Smith, John\"\n2,Allen\n");
        let mut source = DelimitedFileSource::new(file.path(), schema()).with_skip_lines(1);
        source.open(0).await.unwrap();

        let records = drain(&mut source).await;
        assert_eq!(records.len(), 2);
        let first = records[0].as_ref().unwrap();
        assert_eq!(first.get_field("name"), Some(&Value::from("Smith, John")));
        assert_eq!(first.line(), Some(2));
        assert_eq!(source.position(), 2);
    }

    #[tokio::test]
    async fn parse_errors_consume_the_line_and_reading_continues() {
        let file = write_input(b"1,a\nx,b\n\n3,c\n");
        let mut source = DelimitedFileSource::new(file.path(), schema());
        source.open(0).await.unwrap();

        let records = drain(&mut source).await;
        assert_eq!(records.len(), 3);
        assert!(matches!(records[1], Err(BatchError::Parse { line: 2, .. })));
        assert!(records[2].is_ok());
        assert_eq!(source.position(), 4);
    }

    #[tokio::test]
    async fn resumes_from_restart_position() {
        let file = write_input(b"id,name\n1,a\n2,b\n3,c\n");
        let mut source = DelimitedFileSource::new(file.path(), schema()).with_skip_lines(1);
        source.open(2).await.unwrap();

        let records = drain(&mut source).await;
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].as_ref().unwrap().get_field("id"),
            Some(&Value::from(3))
        );
    }

    #[tokio::test]
    async fn decodes_latin1_and_rejects_invalid_utf8() {
        let file = write_input(b"1,Jos\xe9\n");

        let mut latin = DelimitedFileSource::new(file.path(), schema())
            .with_encoding(Encoding::Latin1);
        latin.open(0).await.unwrap();
        let record = latin.read().await.unwrap().unwrap();
        assert_eq!(record.get_field("name"), Some(&Value::from("José")));

        let mut utf8 = DelimitedFileSource::new(file.path(), schema());
        utf8.open(0).await.unwrap();
        assert!(matches!(utf8.read().await, Err(BatchError::Parse { .. })));
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DelimitedFileSource::new(dir.path().join("absent.csv"), schema());
        let err = source.open(0).await.unwrap_err();
        assert!(matches!(err, BatchError::SourceUnavailable(_)));
    }

    #[test]
    fn parses_charset_names() {
        assert_eq!("utf-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("ISO_8859_1".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert!("EBCDIC".parse::<Encoding>().is_err());
    }
}
