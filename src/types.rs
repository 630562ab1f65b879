//! Core data model: values, field descriptors, expression specs and the per-pass value context

use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Millisecond timestamp supplied by the host (wall clock or a simulated one).
pub type Millis = u64;

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
        }
    }

    /// Numeric view of the value, coercing numeric strings.
    /// Booleans, null and non-numeric strings are ambiguous and yield `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
            Value::Boolean(_) | Value::Null => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    /// Parse a raw command-line style value: numbers, booleans, `null`, otherwise a string.
    pub fn parse_raw(raw: &str) -> Value {
        let trimmed = raw.trim();
        match trimmed {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            "null" => Value::Null,
            _ => match trimmed.parse::<f64>() {
                Ok(n) if !trimmed.is_empty() => Value::Number(n),
                _ => Value::String(raw.to_string()),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.is_nan() {
                    write!(f, "NaN")
                } else if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

/// What an expression-bearing field computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionMode {
    #[default]
    Value,
    Visibility,
    Text,
}

/// Declared expression of a derived field, as delivered by the schema loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionSpec {
    #[serde(rename = "expression")]
    pub source: String,
    #[serde(default)]
    pub mode: ExpressionMode,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_evaluate_on_change")]
    pub evaluate_on_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

fn default_evaluate_on_change() -> bool {
    true
}

impl ExpressionSpec {
    pub fn new(source: impl Into<String>, mode: ExpressionMode, dependencies: &[&str]) -> Self {
        Self {
            source: source.into(),
            mode,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            evaluate_on_change: true,
            debounce_ms: None,
            default_value: None,
        }
    }

    pub fn with_debounce(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = Some(debounce_ms);
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// One field of a loaded form. Immutable once the schema is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<ExpressionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

impl FieldDescriptor {
    pub fn input(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expression: None,
            initial_value: None,
            required: false,
        }
    }

    pub fn derived(id: impl Into<String>, expression: ExpressionSpec) -> Self {
        Self {
            id: id.into(),
            expression: Some(expression),
            initial_value: None,
            required: false,
        }
    }

    pub fn with_initial(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = Some(value.into());
        self
    }

    pub fn is_derived(&self) -> bool {
        self.expression.is_some()
    }
}

/// Snapshot of a single field as seen by one propagation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct FieldSnapshot {
    pub value: Value,
    pub valid: bool,
    pub required: bool,
}

impl FieldSnapshot {
    pub fn new(value: Value) -> Self {
        Self { value, valid: true, required: false }
    }
}

/// Field id -> snapshot mapping owned by a single propagation pass.
#[derive(Debug, Clone, Default)]
pub struct ValueContext {
    fields: HashMap<String, FieldSnapshot>,
}

impl ValueContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field_id: impl Into<String>, snapshot: FieldSnapshot) {
        self.fields.insert(field_id.into(), snapshot);
    }

    /// Patch only the value of a field, keeping its validity flags.
    pub fn set_value(&mut self, field_id: &str, value: Value) {
        match self.fields.get_mut(field_id) {
            Some(snapshot) => snapshot.value = value,
            None => {
                self.fields.insert(field_id.to_string(), FieldSnapshot::new(value));
            }
        }
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldSnapshot> {
        self.fields.get(field_id)
    }

    pub fn value(&self, field_id: &str) -> Option<&Value> {
        self.fields.get(field_id).map(|s| &s.value)
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.fields.contains_key(field_id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ValueContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = ValueContext::new();
        for (id, value) in iter {
            context.insert(id, FieldSnapshot::new(value.into()));
        }
        context
    }
}

/// A raw value-change event from an input widget or a programmatic update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueChange {
    pub field_id: String,
    pub new_value: Value,
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl ValueChange {
    pub fn new(field_id: impl Into<String>, new_value: impl Into<Value>) -> Self {
        Self {
            field_id: field_id.into(),
            new_value: new_value.into(),
            valid: true,
        }
    }
}

/// One settled field, delivered to the UI layer.
///
/// `value` is what the widget should display: the computed value on success,
/// or the last good value / `defaultValue` when `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub field_id: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EvalError>,
    pub timestamp: Millis,
}

impl EvaluationResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
