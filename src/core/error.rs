use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Source error: {0}")]
    Source(#[from] anyhow::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BatchError {
    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            Self::Source(_) | Self::Io(_) => ErrorKind::Source,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Transform(_) => ErrorKind::Transform,
            Self::Sink(_) => ErrorKind::Sink,
            Self::Repository(_) => ErrorKind::Repository,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Per-record failures that the skip policy may absorb.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Transform(_))
    }
}

/// Serializable error classification stored on failed executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SourceUnavailable,
    Source,
    Parse,
    Transform,
    Sink,
    Repository,
    Config,
    Serialization,
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_record_level_errors_are_skippable() {
        assert!(BatchError::parse(3, "bad integer").is_skippable());
        assert!(BatchError::Transform("rejected".into()).is_skippable());
        assert!(!BatchError::Sink("constraint".into()).is_skippable());
        assert!(!BatchError::SourceUnavailable("missing".into()).is_skippable());
    }

    #[test]
    fn kind_serializes_in_upper_snake_case() {
        let kind = BatchError::SourceUnavailable("input.csv".into()).kind();
        assert_eq!(
            serde_json::to_string(&kind).unwrap(),
            "\"SOURCE_UNAVAILABLE\""
        );
    }
}
