use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Typed view over one step's JSON argument object.
#[derive(Debug, Clone, Default)]
pub struct StepArgs {
    values: Map<String, Value>,
}

impl StepArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.as_str())),
            Some(other) => Err(Error::invalid_arguments(format!(
                "argument `{key}` must be a string, got {other}"
            ))),
        }
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)?
            .ok_or_else(|| Error::invalid_arguments(format!("missing required argument `{key}`")))
    }

    /// Positive integer argument; zero and non-integers are rejected.
    pub fn require_positive_u32(&self, key: &str) -> Result<u32> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| Error::invalid_arguments(format!("missing required argument `{key}`")))?;
        let number = value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0);
        number.ok_or_else(|| {
            Error::invalid_arguments(format!(
                "argument `{key}` must be a positive integer, got {value}"
            ))
        })
    }
}
