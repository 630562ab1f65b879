//! A loaded form: descriptors, dependency graph and compiled expressions
//!
//! Everything here is built once per schema load and only read during propagation.

use crate::compiled::{CacheStats, CompiledExpression, ExpressionCache};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::EvalError;
use crate::graph::DependencyGraph;
use crate::schema::FormSchema;
use crate::types::{ExpressionSpec, FieldDescriptor, Value};
use crate::EngineOptions;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub struct Form {
    fields: Vec<FieldDescriptor>,
    positions: HashMap<String, usize>,
    graph: DependencyGraph,
    compiled: HashMap<String, Rc<CompiledExpression>>,
    /// Fields that cannot be evaluated because of a schema or parse error
    blocked: HashMap<String, EvalError>,
    cycles: Vec<Vec<String>>,
    diagnostics: Vec<Diagnostic>,
    cache_stats: CacheStats,
    options: EngineOptions,
}

impl Form {
    /// Validate ids, build the dependency graph and compile every expression.
    ///
    /// Problems become diagnostics scoped to the offending field; the rest of the
    /// form still loads.
    pub fn load(schema: &FormSchema, options: EngineOptions) -> Self {
        let mut diagnostics = Vec::new();
        let mut fields = Vec::with_capacity(schema.fields.len());
        let mut seen = HashSet::new();

        for field in &schema.fields {
            if !is_valid_identifier(&field.id) {
                log::warn!("Ignoring field with invalid id '{}'", field.id);
                diagnostics.push(Diagnostic::invalid_field_id(&field.id));
                continue;
            }
            if !seen.insert(field.id.clone()) {
                log::warn!("Field '{}' redefined, keeping first declaration", field.id);
                diagnostics.push(Diagnostic::duplicate_field(&field.id));
                continue;
            }
            fields.push(field.clone());
        }

        let build = DependencyGraph::build(&fields);
        let mut blocked = HashMap::new();
        for diagnostic in &build.diagnostics {
            if let DiagnosticKind::UnknownDependency { dependency } = &diagnostic.kind {
                blocked.entry(diagnostic.field_id.clone()).or_insert_with(|| EvalError::Schema {
                    message: format!("depends on unknown field '{}'", dependency),
                });
            }
        }
        diagnostics.extend(build.diagnostics);

        let mut cache = ExpressionCache::new();
        let mut compiled = HashMap::new();
        for field in &fields {
            let Some(spec) = &field.expression else {
                continue;
            };
            match cache.compile(&field.id, spec) {
                Ok(expression) => {
                    compiled.insert(field.id.clone(), Rc::new(expression));
                }
                Err(err) => {
                    log::warn!("{}", err);
                    diagnostics.push(Diagnostic::from_compile_error(&field.id, &err));
                    blocked.entry(field.id.clone()).or_insert_with(|| EvalError::from(&err));
                }
            }
        }

        let positions = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();

        log::info!(
            "Form loaded: {} fields, {} expressions, {} diagnostic(s)",
            fields.len(),
            compiled.len(),
            diagnostics.len()
        );

        Self {
            fields,
            positions,
            graph: build.graph,
            compiled,
            blocked,
            cycles: build.cycles,
            diagnostics,
            cache_stats: cache.into_stats(),
            options,
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, field_id: &str) -> Option<&FieldDescriptor> {
        self.positions.get(field_id).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.positions.contains_key(field_id)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn compiled(&self, field_id: &str) -> Option<&Rc<CompiledExpression>> {
        self.compiled.get(field_id)
    }

    pub fn blocked(&self, field_id: &str) -> Option<&EvalError> {
        self.blocked.get(field_id)
    }

    pub fn cycles(&self) -> &[Vec<String>] {
        &self.cycles
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn cache_stats(&self) -> &CacheStats {
        &self.cache_stats
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn expression(&self, field_id: &str) -> Option<&ExpressionSpec> {
        self.field(field_id).and_then(|f| f.expression.as_ref())
    }

    pub fn is_derived(&self, field_id: &str) -> bool {
        self.expression(field_id).is_some()
    }

    /// Debounce window of a derived field, falling back to the configured default.
    pub fn debounce_ms(&self, field_id: &str) -> u64 {
        self.expression(field_id)
            .and_then(|spec| spec.debounce_ms)
            .unwrap_or(self.options.default_debounce_ms)
    }

    pub fn default_value(&self, field_id: &str) -> Value {
        self.expression(field_id)
            .and_then(|spec| spec.default_value.clone())
            .unwrap_or(Value::Null)
    }
}

/// Field ids follow expression identifier rules so they can be referenced.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    if matches!(name, "true" | "false") {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExpressionMode;

    fn derived(id: &str, source: &str, deps: &[&str]) -> FieldDescriptor {
        FieldDescriptor::derived(id, ExpressionSpec::new(source, ExpressionMode::Value, deps))
    }

    #[test]
    fn test_is_valid_identifier() {
        let cases = vec![
            ("x", true),
            ("_private", true),
            ("field_2", true),
            ("2fast", false),
            ("with-dash", false),
            ("", false),
            ("true", false),
        ];
        for (input, expected) in cases {
            assert_eq!(is_valid_identifier(input), expected, "Failed for input: '{}'", input);
        }
    }

    #[test]
    fn test_load_clean_form() {
        let schema = FormSchema::new(vec![
            FieldDescriptor::input("x"),
            derived("y", "x * 2", &["x"]),
            derived("z", "y + 5", &["y"]),
        ]);
        let form = Form::load(&schema, EngineOptions::default());

        assert!(form.diagnostics().is_empty());
        assert!(!form.has_errors());
        assert!(form.compiled("y").is_some());
        assert!(form.compiled("x").is_none());
        assert!(form.is_derived("z"));
    }

    #[test]
    fn test_blocked_fields() {
        let schema = FormSchema::new(vec![
            FieldDescriptor::input("x"),
            derived("bad_syntax", "x +", &["x"]),
            derived("bad_dep", "x + missing", &["x", "missing"]),
            derived("sneaky", "x + other", &["x"]),
            FieldDescriptor::input("other"),
            derived("fine", "x", &["x"]),
        ]);
        let form = Form::load(&schema, EngineOptions::default());

        assert!(matches!(form.blocked("bad_syntax"), Some(EvalError::Parse { .. })));
        assert!(matches!(form.blocked("bad_dep"), Some(EvalError::Schema { .. })));
        assert!(matches!(form.blocked("sneaky"), Some(EvalError::Schema { .. })));
        assert!(form.blocked("fine").is_none());
        assert!(form.has_errors());
    }

    #[test]
    fn test_duplicate_and_invalid_ids() {
        let schema = FormSchema::new(vec![
            FieldDescriptor::input("x"),
            FieldDescriptor::input("x"),
            FieldDescriptor::input("not valid"),
        ]);
        let form = Form::load(&schema, EngineOptions::default());

        assert_eq!(form.fields().len(), 1);
        let kinds: Vec<&DiagnosticKind> = form.diagnostics().iter().map(|d| &d.kind).collect();
        assert_eq!(kinds, vec![&DiagnosticKind::DuplicateField, &DiagnosticKind::InvalidFieldId]);
    }

    #[test]
    fn test_debounce_default_applies() {
        let schema = FormSchema::new(vec![
            FieldDescriptor::input("x"),
            derived("y", "x", &["x"]),
            FieldDescriptor::derived(
                "z",
                ExpressionSpec::new("x", ExpressionMode::Value, &["x"]).with_debounce(40),
            ),
        ]);
        let options = EngineOptions { default_debounce_ms: 250, ..Default::default() };
        let form = Form::load(&schema, options);

        assert_eq!(form.debounce_ms("y"), 250);
        assert_eq!(form.debounce_ms("z"), 40);
    }

    #[test]
    fn test_shared_sources_hit_cache() {
        let schema = FormSchema::new(vec![
            FieldDescriptor::input("x"),
            derived("a", "x * 2", &["x"]),
            derived("b", "x * 2", &["x"]),
        ]);
        let form = Form::load(&schema, EngineOptions::default());
        assert_eq!(form.cache_stats().hits, 1);
        assert_eq!(form.cache_stats().misses, 1);
    }
}
