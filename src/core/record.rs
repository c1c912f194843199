use crate::core::{BatchError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: HashMap<String, Value>,
    pub metadata: HashMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_data(data: HashMap<String, Value>) -> Self {
        Self {
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn set_field(&mut self, name: String, value: Value) {
        self.data.insert(name, value);
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn set_metadata(&mut self, key: String, value: String) {
        self.metadata.insert(key, value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    /// Physical input line this record was read from, when known.
    pub fn line(&self) -> Option<u64> {
        self.get_metadata("line").and_then(|l| l.parse().ok())
    }

    /// Deserializes the field map into a domain struct.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        let object: serde_json::Map<String, Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| BatchError::Transform(format!("cannot map record: {}", e)))
    }

    /// Builds a record from a domain struct that serializes to a JSON object.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| BatchError::Transform(format!("cannot build record: {}", e)))?;
        match value {
            Value::Object(object) => Ok(Self::with_data(object.into_iter().collect())),
            other => Err(BatchError::Transform(format!(
                "expected a struct, got {}",
                other
            ))),
        }
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::with_data(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
