//! JSON configuration for the delimited-file → SQL import job.
//!
//! ```json
//! {
//!   "chunk_size": 2,
//!   "input": {
//!     "resource": "data/employees.csv",
//!     "skip_lines": 1,
//!     "fields": [{ "name": "empNumber", "data_type": "integer", "nullable": false }]
//!   },
//!   "output": {
//!     "database_url": "sqlite://employees.db?mode=rwc",
//!     "statement": "INSERT INTO employee (empnumber) VALUES (:empNumber)"
//!   }
//! }
//! ```

use crate::chunk::ChunkPolicy;
use crate::core::{BatchError, Field, Result, Schema};
use crate::sink::InsertStatement;
use crate::source::Encoding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default = "default_step_name")]
    pub step_name: String,
    pub chunk_size: usize,
    #[serde(default)]
    pub retry_limit: u32,
    #[serde(default)]
    pub skip_limit: u64,
    pub input: InputConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub resource: PathBuf,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub skip_lines: usize,
    #[serde(default)]
    pub comment_prefix: Option<String>,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub database_url: String,
    /// Insert with `:name` parameters matching input field names.
    pub statement: String,
    /// Statements run once before the job, e.g. `CREATE TABLE IF NOT EXISTS`.
    #[serde(default)]
    pub init_statements: Vec<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Execution log file; in-memory when unset, which disables restart
    /// across processes.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_job_name() -> String {
    "chunkJob".to_string()
}

fn default_step_name() -> String {
    "EmpImportStep1".to_string()
}

fn default_delimiter() -> char {
    ','
}

fn default_max_connections() -> u32 {
    1
}

impl BatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BatchError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| BatchError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() || self.step_name.trim().is_empty() {
            return Err(BatchError::Config("job and step names must not be empty".to_string()));
        }
        self.policy().validate()?;
        self.schema().validate()?;
        if !self.input.delimiter.is_ascii() || matches!(self.input.delimiter, '"' | '\n' | '\r') {
            return Err(BatchError::Config(format!(
                "unusable delimiter {:?}",
                self.input.delimiter
            )));
        }

        let statement = self.statement()?;
        let schema = self.schema();
        if let Some(missing) = statement
            .params
            .iter()
            .find(|p| schema.get_field(p).is_none())
        {
            return Err(BatchError::Config(format!(
                "statement parameter ':{}' has no matching input field",
                missing
            )));
        }
        if self.output.max_connections == 0 {
            return Err(BatchError::Config("max_connections must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn policy(&self) -> ChunkPolicy {
        ChunkPolicy::new(self.chunk_size)
            .with_retry_limit(self.retry_limit)
            .with_skip_limit(self.skip_limit)
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.input.fields.clone())
    }

    pub fn statement(&self) -> Result<InsertStatement> {
        InsertStatement::parse(&self.output.statement)
    }

    pub fn delimiter_byte(&self) -> u8 {
        self.input.delimiter as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    const EMPLOYEE_CONFIG: &str = r#"{
        "chunk_size": 2,
        "retry_limit": 1,
        "skip_limit": 1,
        "input": {
            "resource": "data/employees.csv",
            "encoding": "UTF-8",
            "skip_lines": 1,
            "fields": [
                { "name": "empNumber", "data_type": "integer", "nullable": false },
                { "name": "empName" },
                { "name": "jobTitle" },
                { "name": "mgrNumber", "data_type": "integer" },
                { "name": "hireDate", "data_type": "date" }
            ]
        },
        "output": {
            "database_url": "sqlite::memory:",
            "statement": "INSERT INTO employee (empnumber, empname, jobtitle, mgrnumber, hiredate) VALUES (:empNumber, :empName, :jobTitle, :mgrNumber, :hireDate)"
        }
    }"#;

    #[test]
    fn parses_employee_config_with_defaults() {
        let config: BatchConfig = serde_json::from_str(EMPLOYEE_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.job_name, "chunkJob");
        assert_eq!(config.step_name, "EmpImportStep1");
        assert_eq!(config.input.encoding, Encoding::Utf8);
        assert_eq!(config.input.delimiter, ',');
        assert_eq!(
            config.schema().field_names(),
            vec!["empNumber", "empName", "jobTitle", "mgrNumber", "hireDate"]
        );
        assert_eq!(config.schema().fields[4].data_type, DataType::Date);
        assert_eq!(config.policy(), ChunkPolicy::new(2).with_retry_limit(1).with_skip_limit(1));
        assert!(config.repository.path.is_none());
    }

    #[test]
    fn rejects_zero_chunk_size_and_unknown_parameters() {
        let mut config: BatchConfig = serde_json::from_str(EMPLOYEE_CONFIG).unwrap();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config: BatchConfig = serde_json::from_str(EMPLOYEE_CONFIG).unwrap();
        config.output.statement = "INSERT INTO employee (x) VALUES (:salary)".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("salary"));
    }

    #[test]
    fn unsupported_encoding_fails_to_deserialize() {
        let json = EMPLOYEE_CONFIG.replace("\"UTF-8\"", "\"EBCDIC\"");
        assert!(serde_json::from_str::<BatchConfig>(&json).is_err());
    }

    #[test]
    fn from_file_reports_missing_file_as_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BatchConfig::from_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }
}
