use crate::core::{BatchError, Record, Result, Sink, TransactionScope};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

/// Insert statement with named parameters rewritten to positional
/// placeholders.
///
/// `INSERT INTO employee (empnumber) VALUES (:empNumber)` becomes
/// `INSERT INTO employee (empnumber) VALUES (?)` with parameter
/// `["empNumber"]`. Parameters are resolved against record fields by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub params: Vec<String>,
}

impl InsertStatement {
    pub fn parse(statement: &str) -> Result<Self> {
        let mut sql = String::with_capacity(statement.len());
        let mut params = Vec::new();
        let mut chars = statement.chars().peekable();
        let mut in_quote = false;
        let mut prev = '\0';

        while let Some(c) = chars.next() {
            if c == '\'' {
                in_quote = !in_quote;
            }
            let starts_param = !in_quote
                && c == ':'
                && prev != ':'
                && chars
                    .peek()
                    .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_');
            if starts_param {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                params.push(name);
                sql.push('?');
                prev = '?';
                continue;
            }
            sql.push(c);
            prev = c;
        }

        if in_quote {
            return Err(BatchError::Config(format!(
                "unterminated string literal in statement: {}",
                statement
            )));
        }
        if params.is_empty() {
            return Err(BatchError::Config(format!(
                "statement has no named parameters: {}",
                statement
            )));
        }
        Ok(Self { sql, params })
    }

    /// Builds the insert from `(column, field)` pairs.
    pub fn for_table<C, F>(table: &str, columns: &[(C, F)]) -> Result<Self>
    where
        C: AsRef<str>,
        F: AsRef<str>,
    {
        if columns.is_empty() {
            return Err(BatchError::Config(format!("no columns for table {}", table)));
        }
        let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_ref()).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        Ok(Self {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                names.join(", "),
                placeholders
            ),
            params: columns.iter().map(|(_, f)| f.as_ref().to_string()).collect(),
        })
    }
}

/// Writes each chunk inside one SQLite transaction, one insert per record.
pub struct SqlSink {
    pool: SqlitePool,
    statement: InsertStatement,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqlSink {
    pub fn new(pool: SqlitePool, statement: InsertStatement) -> Self {
        Self {
            pool,
            statement,
            tx: None,
        }
    }

    pub fn statement(&self) -> &InsertStatement {
        &self.statement
    }
}

fn sink_error(e: sqlx::Error) -> BatchError {
    BatchError::Sink(e.to_string())
}

#[async_trait]
impl TransactionScope for SqlSink {
    async fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(BatchError::Sink("transaction already open".to_string()));
        }
        self.tx = Some(self.pool.begin().await.map_err(sink_error)?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| BatchError::Sink("no open transaction".to_string()))?;
        tx.commit().await.map_err(sink_error)
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(sink_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for SqlSink {
    async fn open(&mut self, resuming: bool) -> Result<()> {
        info!(sql = %self.statement.sql, resuming, "SQL sink ready");
        Ok(())
    }

    async fn write(&mut self, records: &[Record]) -> Result<()> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| BatchError::Sink("write outside a transaction".to_string()))?;

        for record in records {
            let mut query = sqlx::query(&self.statement.sql);
            for param in &self.statement.params {
                query = match record.get_field(param) {
                    Some(Value::String(s)) => query.bind(s.clone()),
                    Some(Value::Number(n)) if n.is_i64() => query.bind(n.as_i64()),
                    Some(Value::Number(n)) => query.bind(n.as_f64()),
                    Some(Value::Bool(b)) => query.bind(*b),
                    Some(Value::Null) => query.bind(Option::<String>::None),
                    Some(other) => query.bind(other.to_string()),
                    None => {
                        return Err(BatchError::Sink(format!(
                            "record has no field '{}' for statement parameter",
                            param
                        )));
                    }
                };
            }
            query.execute(&mut **tx).await.map_err(sink_error)?;
        }
        debug!(records = records.len(), "Executed batch inserts");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.rollback().await
    }
}
