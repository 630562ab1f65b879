//! Error types for fieldflow

use serde::Serialize;
use thiserror::Error;

/// Errors that stop an operation outright: reading a schema, loading a config,
/// or compiling a standalone expression.
#[derive(Error, Debug)]
pub enum FormError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error in {field} at position {position} near {token}: {message}")]
    Parse { field: String, position: usize, token: String, message: String },

    #[error("Schema error in field '{field}': {message}")]
    Schema { field: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },
}

pub type Result<T> = std::result::Result<T, FormError>;

impl FormError {
    pub fn parse(
        field: impl Into<String>,
        position: usize,
        token: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            field: field.into(),
            position,
            token: token.into(),
            message: message.into(),
        }
    }

    pub fn schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Parse errors raised before the expression is attached to a field
    pub fn parse_anonymous(position: usize, token: impl Into<String>, message: impl Into<String>) -> Self {
        Self::parse("<expression>", position, token, message)
    }

    /// Re-scope a parse error to the field that owns the expression.
    pub fn with_field(self, field_id: &str) -> Self {
        match self {
            Self::Parse { position, token, message, .. } => Self::Parse {
                field: field_id.to_string(),
                position,
                token,
                message,
            },
            other => other,
        }
    }
}

/// Per-field evaluation failure. Attached to an `EvaluationResult`; never aborts a pass.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalError {
    #[error("parse error at position {position} near {token}: {message}")]
    Parse { position: usize, token: String, message: String },

    #[error("unresolved reference '{name}'")]
    UnresolvedReference { name: String },

    #[error("field participates in a dependency cycle with {members:?}")]
    CycleParticipant { members: Vec<String> },

    #[error("type error: {message}")]
    Type { message: String },

    #[error("schema error: {message}")]
    Schema { message: String },
}

impl EvalError {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type { message: message.into() }
    }

    pub fn unresolved(name: impl Into<String>) -> Self {
        Self::UnresolvedReference { name: name.into() }
    }
}

impl From<&FormError> for EvalError {
    fn from(err: &FormError) -> Self {
        match err {
            FormError::Parse { position, token, message, .. } => EvalError::Parse {
                position: *position,
                token: token.clone(),
                message: message.clone(),
            },
            FormError::Schema { message, .. } => EvalError::Schema { message: message.clone() },
            other => EvalError::Schema { message: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_rescoped_to_field() {
        let err = FormError::parse_anonymous(4, "')'", "Expected expression").with_field("total");
        assert_eq!(
            err.to_string(),
            "Parse error in total at position 4 near ')': Expected expression"
        );
    }

    #[test]
    fn test_eval_error_from_form_error() {
        let err = FormError::parse("bmi", 7, "'*'", "Expected expression");
        match EvalError::from(&err) {
            EvalError::Parse { position, token, .. } => {
                assert_eq!(position, 7);
                assert_eq!(token, "'*'");
            }
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_eval_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(EvalError::unresolved("x")).unwrap();
        assert_eq!(json["kind"], "unresolved_reference");
        assert_eq!(json["name"], "x");
    }
}
