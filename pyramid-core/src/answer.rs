//! Answers to posed questions.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PyramidError, Result};

/// A user's response to a pending question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerToQuestion {
    /// Pyramid the question was asked for
    pub pyramid_id: String,
    /// Datapoint slot being answered, e.g. "reciprocity"
    pub datapoint_key: String,
    /// Answered value; its shape depends on the slot
    pub value: serde_json::Value,
}

impl AnswerToQuestion {
    /// Create an answer.
    pub fn new(
        pyramid_id: impl Into<String>,
        datapoint_key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            pyramid_id: pyramid_id.into(),
            datapoint_key: datapoint_key.into(),
            value,
        }
    }
}

/// Either a single item or a list of items.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Flatten into a list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// Decode an answer value into the slot's type.
pub fn decode<T: DeserializeOwned>(value: &serde_json::Value, expected: &str) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| {
        PyramidError::validation("value", format!("expected {}: {}", expected, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reciprocity;
    use serde_json::json;

    #[test]
    fn test_one_or_many() {
        let one: OneOrMany<String> = decode(&json!("moving"), "text").unwrap();
        assert_eq!(one.into_vec(), vec!["moving"]);
        let many: OneOrMany<u32> = decode(&json!([1, 2]), "numbers").unwrap();
        assert_eq!(many.into_vec(), vec![1, 2]);
    }

    #[test]
    fn test_decode_error_names_value() {
        let err = decode::<Reciprocity>(&json!("sometimes"), "reciprocity").unwrap_err();
        assert_eq!(err.field(), "value");
        assert!(err.to_string().contains("reciprocity"));
    }
}
