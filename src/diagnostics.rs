//! Structured, field-scoped diagnostics for the schema validity reporter

use crate::error::{EvalError, FormError};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnknownDependency { dependency: String },
    DuplicateField,
    InvalidFieldId,
    Cycle { members: Vec<String> },
    Parse { position: usize, token: String },
    UndeclaredReference,
    Evaluation { error: EvalError },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub field_id: String,
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn unknown_dependency(field_id: &str, dependency: &str) -> Self {
        Self {
            field_id: field_id.to_string(),
            severity: Severity::Error,
            kind: DiagnosticKind::UnknownDependency { dependency: dependency.to_string() },
            message: format!("depends on unknown field '{}'", dependency),
        }
    }

    pub fn duplicate_field(field_id: &str) -> Self {
        Self {
            field_id: field_id.to_string(),
            severity: Severity::Error,
            kind: DiagnosticKind::DuplicateField,
            message: "field id declared more than once; later declaration ignored".to_string(),
        }
    }

    pub fn invalid_field_id(field_id: &str) -> Self {
        Self {
            field_id: field_id.to_string(),
            severity: Severity::Error,
            kind: DiagnosticKind::InvalidFieldId,
            message: "field id must start with a letter or '_' and contain only letters, digits and '_'"
                .to_string(),
        }
    }

    /// One diagnostic per cycle member, each carrying the full member set.
    pub fn cycle(members: &[String]) -> Vec<Self> {
        members
            .iter()
            .map(|field_id| Self {
                field_id: field_id.clone(),
                severity: Severity::Error,
                kind: DiagnosticKind::Cycle { members: members.to_vec() },
                message: format!("dependency cycle among {{{}}}", members.join(", ")),
            })
            .collect()
    }

    pub fn from_compile_error(field_id: &str, err: &FormError) -> Self {
        let kind = match err {
            FormError::Parse { position, token, .. } => DiagnosticKind::Parse {
                position: *position,
                token: token.clone(),
            },
            _ => DiagnosticKind::UndeclaredReference,
        };
        Self {
            field_id: field_id.to_string(),
            severity: Severity::Error,
            kind,
            message: err.to_string(),
        }
    }

    pub fn evaluation(field_id: &str, error: &EvalError) -> Self {
        Self {
            field_id: field_id.to_string(),
            severity: Severity::Warning,
            kind: DiagnosticKind::Evaluation { error: error.clone() },
            message: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{} [{}]: {}", level, self.field_id, self.message)
    }
}
