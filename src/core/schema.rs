use crate::core::{BatchError, Record, Result};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    /// `YYYY-MM-DD`
    Date,
    /// RFC 3339
    DateTime,
}

impl DataType {
    /// Converts one raw token into a JSON value of this type.
    fn parse(&self, raw: &str) -> std::result::Result<Value, String> {
        match self {
            DataType::String => Ok(Value::String(raw.to_string())),
            DataType::Integer => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("'{}' is not an integer: {}", raw, e)),
            DataType::Float => raw
                .parse::<f64>()
                .map_err(|e| format!("'{}' is not a number: {}", raw, e))
                .and_then(|f| {
                    serde_json::Number::from_f64(f)
                        .map(Value::Number)
                        .ok_or_else(|| format!("'{}' is not a finite number", raw))
                }),
            DataType::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "no" | "n" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", raw)),
            },
            DataType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .map_err(|e| format!("'{}' is not a date: {}", raw, e)),
            DataType::DateTime => DateTime::parse_from_rfc3339(raw)
                .map(|d| Value::String(d.to_rfc3339()))
                .map_err(|e| format!("'{}' is not a timestamp: {}", raw, e)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered field layout of a delimited record, fixed when a source is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// All-string schema from bare field names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|name| Field::new(name, DataType::String))
                .collect(),
        )
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(BatchError::Config("schema has no fields".to_string()));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(BatchError::Config(format!("field {} has an empty name", i)));
            }
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(BatchError::Config(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
        }
        Ok(())
    }

    /// Maps positional tokens onto the named fields. Token count must match
    /// the schema exactly.
    pub fn map_tokens<'a, I>(&self, tokens: I, line: u64) -> Result<Record>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tokens: Vec<&str> = tokens.into_iter().collect();
        if tokens.len() != self.fields.len() {
            return Err(BatchError::parse(
                line,
                format!(
                    "expected {} fields, found {}",
                    self.fields.len(),
                    tokens.len()
                ),
            ));
        }

        let mut record = Record::new();
        for (field, token) in self.fields.iter().zip(tokens) {
            let token = token.trim();
            let value = if token.is_empty() {
                if !field.nullable {
                    return Err(BatchError::parse(
                        line,
                        format!("required field '{}' is empty", field.name),
                    ));
                }
                Value::Null
            } else {
                field
                    .data_type
                    .parse(token)
                    .map_err(|msg| BatchError::parse(line, format!("{}: {}", field.name, msg)))?
            };
            record.set_field(field.name.clone(), value);
        }
        record.set_metadata("line".to_string(), line.to_string());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee_schema() -> Schema {
        Schema::new(vec![
            Field::new("EmpNumber", DataType::Integer).required(),
            Field::new("EmpName", DataType::String),
            Field::new("JobTitle", DataType::String),
            Field::new("MgrNumber", DataType::Integer),
            Field::new("HireDate", DataType::Date),
        ])
    }

    #[test]
    fn maps_tokens_by_position_and_type() {
        let record = employee_schema()
            .map_tokens(["7369", " SMITH ", "CLERK", "7902", "1980-12-17"], 2)
            .unwrap();

        assert_eq!(record.get_field("EmpNumber"), Some(&Value::from(7369)));
        assert_eq!(record.get_field("EmpName"), Some(&Value::from("SMITH")));
        assert_eq!(record.get_field("HireDate"), Some(&Value::from("1980-12-17")));
        assert_eq!(record.get_metadata("line"), Some("2"));
    }

    #[test]
    fn empty_optional_field_becomes_null() {
        let record = employee_schema()
            .map_tokens(["7839", "KING", "PRESIDENT", "", "1981-11-17"], 1)
            .unwrap();
        assert_eq!(record.get_field("MgrNumber"), Some(&Value::Null));
    }

    #[test]
    fn rejects_wrong_field_count_and_bad_values() {
        let schema = employee_schema();

        let err = schema.map_tokens(["1", "A"], 4).unwrap_err();
        assert!(matches!(err, BatchError::Parse { line: 4, .. }));

        let err = schema
            .map_tokens(["x", "A", "B", "1", "1980-01-01"], 5)
            .unwrap_err();
        assert!(err.to_string().contains("EmpNumber"));

        let err = schema
            .map_tokens(["", "A", "B", "1", "1980-01-01"], 6)
            .unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn validate_catches_duplicates() {
        let schema = Schema::from_names(["a", "b", "a"]);
        assert!(matches!(schema.validate(), Err(BatchError::Config(_))));
        assert!(Schema::from_names(Vec::<String>::new()).validate().is_err());
    }

    #[test]
    fn field_defaults_from_json() {
        let field: Field = serde_json::from_str(r#"{"name":"EmpName"}"#).unwrap();
        assert_eq!(field.data_type, DataType::String);
        assert!(field.nullable);
    }
}
