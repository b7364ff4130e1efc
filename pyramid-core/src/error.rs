//! Error types for pyramid operations.
//!
//! Every error carries the path of the offending field so callers can
//! resubmit corrected input without guessing.

use serde::{Deserialize, Serialize};

/// Broad classification of a [`PyramidError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed evidence or answer, rejected before mutation
    Validation,
    /// Operation not meaningful for the pyramid's variant or state
    StateInvariant,
    /// Unknown pyramid id
    NotFound,
}

/// Error types for the pyramid model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PyramidError {
    /// Structurally invalid input (missing identifiers, out-of-range values)
    #[error("Validation failed at `{field}`: {message}")]
    Validation {
        /// Path of the offending field
        field: String,
        /// What was wrong with it
        message: String,
    },

    /// The operation contradicts the pyramid's variant or lifecycle
    #[error("State invariant violated at `{field}`: {message}")]
    StateInvariant {
        /// Path of the offending field
        field: String,
        /// What was wrong with it
        message: String,
    },

    /// No pyramid with this id
    #[error("Pyramid not found: {0}")]
    NotFound(String),
}

impl PyramidError {
    /// Build a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build a state invariant error.
    pub fn invariant(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateInvariant {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::StateInvariant { .. } => ErrorKind::StateInvariant,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Field path the error refers to.
    pub fn field(&self) -> &str {
        match self {
            Self::Validation { field, .. } | Self::StateInvariant { field, .. } => field,
            Self::NotFound(_) => "pyramid_id",
        }
    }

    /// Prefix the field path, e.g. `interaction` + `duration_minutes`.
    pub fn within(self, parent: &str) -> Self {
        match self {
            Self::Validation { field, message } => Self::Validation {
                field: format!("{}.{}", parent, field),
                message,
            },
            Self::StateInvariant { field, message } => Self::StateInvariant {
                field: format!("{}.{}", parent, field),
                message,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PyramidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_field() {
        let err = PyramidError::validation("entry_id", "must not be blank");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.field(), "entry_id");

        let nested = err.within("evidence");
        assert_eq!(nested.field(), "evidence.entry_id");

        let missing = PyramidError::NotFound("relationship_bob".to_string());
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(missing.to_string().contains("relationship_bob"));
    }
}
