//! Fieldflow: reactive derived fields for declarative forms
//!
//! A form schema declares input fields and fields whose value (or visibility, or text)
//! is computed from other fields by a small expression language. Fieldflow parses
//! those expressions once, builds the dependency graph, and on every user edit
//! re-evaluates only the affected fields, in dependency order, after a debounce window.
//!
//! # Basic Usage
//!
//! ```rust
//! use fieldflow::*;
//! use std::rc::Rc;
//!
//! let schema = FormSchema::new(vec![
//!     FieldDescriptor::input("x"),
//!     FieldDescriptor::derived("y", ExpressionSpec::new("x * 2", ExpressionMode::Value, &["x"])),
//! ]);
//! let form = Rc::new(Form::load(&schema, EngineOptions::default()));
//! let mut propagator = Propagator::new(form);
//! propagator.evaluate_all(0, &mut NullSink);
//!
//! propagator.on_change(ValueChange::new("x", 21.0), 0);
//! let mut results: Vec<EvaluationResult> = Vec::new();
//! propagator.poll(0, &mut results);
//! assert_eq!(results[0].value, Value::Number(42.0));
//! ```
//!
//! # Pipeline
//!
//! 1. **Schema**: JSON or TOML document deserialized into field descriptors
//! 2. **Form load**: id validation, dependency graph, cycle detection, expression compilation
//! 3. **Propagation**: debounce, affected-subgraph scheduling, evaluation, result delivery

pub mod error;
pub mod types;
pub mod lexer;
pub mod ast;
pub mod parser;
pub mod evaluator;
pub mod template;
pub mod compiled;
pub mod diagnostics;
pub mod graph;
pub mod scheduler;
pub mod schema;
pub mod form;
pub mod propagator;
pub mod cli;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use error::{EvalError, FormError, Result};
pub use types::*;
pub use ast::{BinaryOp, Expression, Function, UnaryOp};
pub use parser::parse_expression;
pub use evaluator::Evaluator;
pub use template::{interpolate, Template};
pub use compiled::{CacheStats, CompiledExpression, ExpressionCache};
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use graph::DependencyGraph;
pub use scheduler::{schedule, Schedule, ScheduledField};
pub use schema::FormSchema;
pub use form::Form;
pub use propagator::{
    ComputedValueSink, FnSink, NullSink, PassReport, PropagationStats, Propagator, PropagatorState,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Log every evaluated field at debug level
    pub debug_mode: bool,

    /// Debounce window for expressions that don't set `debounceMs`
    pub default_debounce_ms: u64,

    /// Visibility expressions must produce a boolean exactly
    pub strict_visibility: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debug_mode: false,
            default_debounce_ms: 0,
            strict_visibility: false,
        }
    }
}

/// Load a schema file and build the form.
pub fn load_form<P: AsRef<Path>>(path: P, options: EngineOptions) -> Result<Form> {
    let schema = FormSchema::load(path)?;
    Ok(Form::load(&schema, options))
}

/// Parse a schema document from a string and build the form.
pub fn load_form_from_json(content: &str, options: EngineOptions) -> Result<Form> {
    let schema = FormSchema::from_json_str(content)?;
    Ok(Form::load(&schema, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    fn value(source: &str, deps: &[&str]) -> ExpressionSpec {
        ExpressionSpec::new(source, ExpressionMode::Value, deps)
    }

    fn start(fields: Vec<FieldDescriptor>) -> Propagator {
        let form = Form::load(&FormSchema::new(fields), EngineOptions::default());
        let mut propagator = Propagator::new(Rc::new(form));
        propagator.evaluate_all(0, &mut NullSink);
        propagator
    }

    fn set(propagator: &mut Propagator, field_id: &str, new_value: impl Into<Value>, now: Millis) -> Option<PassReport> {
        propagator.on_change(ValueChange::new(field_id, new_value), now);
        propagator.fire_timer(&mut NullSink)
    }

    #[test]
    fn test_scenario_a_chain() {
        let mut p = start(vec![
            FieldDescriptor::input("x"),
            FieldDescriptor::derived("y", value("x * 2", &["x"])),
            FieldDescriptor::derived("z", value("y + 5", &["y"])),
        ]);

        set(&mut p, "x", 3.0, 0);
        assert_eq!(p.value("y"), Some(&Value::Number(6.0)));
        assert_eq!(p.value("z"), Some(&Value::Number(11.0)));

        set(&mut p, "x", 5.0, 10);
        assert_eq!(p.value("y"), Some(&Value::Number(10.0)));
        assert_eq!(p.value("z"), Some(&Value::Number(15.0)));
    }

    #[test]
    fn test_scenario_b_bmi() {
        let p = start(vec![
            FieldDescriptor::input("weight").with_initial(70.0),
            FieldDescriptor::input("height").with_initial(175.0),
            FieldDescriptor::derived(
                "bmi",
                value("round(weight / pow(height/100, 2) * 10) / 10", &["weight", "height"]),
            ),
        ]);
        assert_eq!(p.value("bmi"), Some(&Value::Number(22.9)));
    }

    #[test]
    fn test_scenario_c_division_guard() {
        let mut p = start(vec![
            FieldDescriptor::input("total").with_initial(100.0),
            FieldDescriptor::input("count").with_initial(4.0),
            FieldDescriptor::derived("average", value("total / count", &["total", "count"])),
            FieldDescriptor::derived("doubled", value("total * 2", &["total"])),
        ]);
        assert_eq!(p.value("average"), Some(&Value::Number(25.0)));

        let report = set(&mut p, "count", 0.0, 0).unwrap();
        let average = report.result("average").unwrap();
        assert!(average.is_ok());
        assert!(average.value.is_nan());
        assert_eq!(average.value.to_string(), "NaN");

        let report = set(&mut p, "total", 50.0, 10).unwrap();
        assert!(report.result("average").unwrap().value.is_nan());
        assert_eq!(report.result("doubled").unwrap().value, Value::Number(100.0));
    }

    #[test]
    fn test_scenario_d_template() {
        let summary = ExpressionSpec::new("You selected {{x}} — doubled is {{y}}", ExpressionMode::Text, &[]);
        let mut p = start(vec![
            FieldDescriptor::input("x"),
            FieldDescriptor::derived("y", value("x * 2", &["x"])),
            FieldDescriptor::derived("summary", summary.clone()),
        ]);
        set(&mut p, "x", 25.0, 0);
        assert_eq!(p.value("summary"), Some(&Value::from("You selected 25 — doubled is 50")));

        // y removed from the schema
        let form = Form::load(
            &FormSchema::new(vec![FieldDescriptor::input("x"), FieldDescriptor::derived("summary", summary)]),
            EngineOptions::default(),
        );
        assert!(form.diagnostics().is_empty());
        let report = p.reload(Rc::new(form), 20, &mut NullSink);
        let result = report.result("summary").unwrap();
        assert!(result.is_ok());
        assert_eq!(result.value, Value::from("You selected 25 — doubled is "));
    }

    #[test]
    fn test_scenario_e_cycle() {
        let fields = vec![
            FieldDescriptor::derived("a", value("b + 1", &["b"])),
            FieldDescriptor::derived("b", value("a + 1", &["a"])),
            FieldDescriptor::input("seed").with_initial(2.0),
            FieldDescriptor::derived("c", value("seed * 10", &["seed"])),
        ];
        let form = Form::load(&FormSchema::new(fields), EngineOptions::default());
        assert_eq!(form.cycles(), &[vec!["a".to_string(), "b".to_string()]]);
        assert!(form.has_errors());

        let mut p = Propagator::new(Rc::new(form));
        let report = p.evaluate_all(0, &mut NullSink);

        for id in ["a", "b"] {
            match &report.result(id).unwrap().error {
                Some(EvalError::CycleParticipant { members }) => assert_eq!(members, &["a", "b"]),
                other => panic!("Expected cycle error for {}, got {:?}", id, other),
            }
        }
        assert_eq!(report.result("c").unwrap().value, Value::Number(20.0));

        set(&mut p, "seed", 3.0, 5);
        assert_eq!(p.value("c"), Some(&Value::Number(30.0)));
    }

    #[test]
    fn test_coalescing_property() {
        let mut p = start(vec![
            FieldDescriptor::input("q"),
            FieldDescriptor::derived("echo", value("q", &["q"]).with_debounce(300)),
        ]);
        let mut delivered: Vec<EvaluationResult> = Vec::new();

        for (i, now) in [0u64, 100, 200, 250, 299].iter().enumerate() {
            p.on_change(ValueChange::new("q", i as f64), *now);
            assert!(p.poll(*now, &mut delivered).is_none());
        }
        for now in 300..700 {
            p.poll(now, &mut delivered);
        }

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].value, Value::Number(4.0));
        assert_eq!(delivered[0].timestamp, 599);
    }

    #[test]
    fn test_zero_dependents_property() {
        let mut p = start(vec![
            FieldDescriptor::input("notes"),
            FieldDescriptor::input("x"),
            FieldDescriptor::derived("y", value("x", &["x"])),
        ]);
        let passes = p.stats().passes;
        for i in 0..10 {
            assert_eq!(p.on_change(ValueChange::new("notes", i as f64), i), PropagatorState::Idle);
            assert!(p.fire_timer(&mut NullSink).is_none());
        }
        assert_eq!(p.stats().passes, passes);
    }

    #[test]
    fn test_visibility_field() {
        let mut p = start(vec![
            FieldDescriptor::input("age").with_initial(12.0),
            FieldDescriptor::derived(
                "adult_section",
                ExpressionSpec::new("age >= 18", ExpressionMode::Visibility, &["age"]),
            ),
        ]);
        assert_eq!(p.value("adult_section"), Some(&Value::Boolean(false)));
        set(&mut p, "age", "21", 0);
        assert_eq!(p.value("adult_section"), Some(&Value::Boolean(true)));
    }

    #[test]
    fn test_load_form_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("order.json");
        fs::write(
            &path,
            r#"{ "fields": [
                { "id": "price", "initialValue": 4 },
                { "id": "qty", "initialValue": 3 },
                { "id": "total", "expression": { "expression": "price * qty", "mode": "value", "dependencies": ["price", "qty"] } }
            ] }"#,
        )
        .unwrap();

        let form = load_form(&path, EngineOptions::default()).unwrap();
        let mut p = Propagator::new(Rc::new(form));
        let report = p.evaluate_all(0, &mut NullSink);
        assert_eq!(report.result("total").unwrap().value, Value::Number(12.0));
    }

    #[test]
    fn test_load_form_from_json_reports_unknown_dependency() {
        let form = load_form_from_json(
            r#"{ "fields": [ { "id": "y", "expression": { "expression": "ghost", "mode": "value", "dependencies": ["ghost"] } } ] }"#,
            EngineOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            form.diagnostics()[0].kind,
            DiagnosticKind::UnknownDependency { .. }
        ));

        let mut p = Propagator::new(Rc::new(form));
        let report = p.evaluate_all(0, &mut NullSink);
        let y = report.result("y").unwrap();
        assert!(matches!(y.error, Some(EvalError::Schema { .. })));
        assert_eq!(y.value, Value::Null);
    }

    #[test]
    fn test_oversized_expression_blocks_only_its_field() {
        let sum = vec!["x"; 5000].join(" + ");
        let form = Form::load(
            &FormSchema::new(vec![
                FieldDescriptor::input("x").with_initial(1.0),
                FieldDescriptor::derived("total", value(&sum, &["x"])),
                FieldDescriptor::input("a").with_initial(4.0),
                FieldDescriptor::derived("b", value("a * 2", &["a"])),
            ]),
            EngineOptions::default(),
        );
        assert!(form
            .diagnostics()
            .iter()
            .any(|d| d.field_id == "total" && matches!(d.kind, DiagnosticKind::Parse { .. })));

        let mut p = Propagator::new(Rc::new(form));
        let report = p.evaluate_all(0, &mut NullSink);
        assert!(matches!(report.result("total").unwrap().error, Some(EvalError::Parse { .. })));
        assert_eq!(report.result("b").unwrap().value, Value::Number(8.0));
    }
}
