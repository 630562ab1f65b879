//! Compiled expressions and the parse-once cache
//!
//! Parsing is pure, so bodies are cached by `(mode, source)` and shared by reference
//! between fields that declare the same expression. The cache lives as long as one
//! loaded schema; a reload builds a fresh one.

use crate::ast::Expression;
use crate::error::{EvalError, FormError, Result};
use crate::evaluator::Evaluator;
use crate::parser::parse_expression;
use crate::template::Template;
use crate::types::{ExpressionMode, ExpressionSpec, Value, ValueContext};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledBody {
    Expression(Expression),
    Template(Template),
}

impl CompiledBody {
    pub fn referenced_fields(&self) -> Vec<String> {
        match self {
            CompiledBody::Expression(expr) => expr.referenced_fields(),
            CompiledBody::Template(template) => template.referenced_fields(),
        }
    }
}

/// A field's expression after parsing. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub field_id: String,
    pub mode: ExpressionMode,
    pub body: Rc<CompiledBody>,
    /// Ids the evaluator may read: the declared dependencies, or for templates
    /// the declared ids plus every placeholder.
    pub dependencies: Vec<String>,
}

impl CompiledExpression {
    /// Evaluate against one pass's context and coerce the result for the field's mode.
    pub fn evaluate(&self, context: &ValueContext, strict_visibility: bool) -> std::result::Result<Value, EvalError> {
        match self.body.as_ref() {
            CompiledBody::Template(template) => Ok(Value::String(template.render(context))),
            CompiledBody::Expression(expr) => {
                let value = Evaluator::new(context, &self.dependencies).evaluate(expr)?;
                match self.mode {
                    ExpressionMode::Visibility => coerce_visibility(value, strict_visibility),
                    _ => Ok(value),
                }
            }
        }
    }
}

fn coerce_visibility(value: Value, strict: bool) -> std::result::Result<Value, EvalError> {
    match value {
        Value::Boolean(_) => Ok(value),
        Value::Number(n) if n.is_nan() => Err(EvalError::type_error(
            "visibility expression produced NaN",
        )),
        other if !strict => Ok(Value::Boolean(other.is_truthy())),
        other => Err(EvalError::type_error(format!(
            "visibility expression must produce a boolean, got {}",
            other.type_name()
        ))),
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

#[derive(Debug, Default)]
pub struct ExpressionCache {
    bodies: HashMap<(bool, String), Rc<CompiledBody>>,
    stats: CacheStats,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `spec` for `field_id`. Parse errors are scoped to the field.
    ///
    /// For value/visibility expressions every referenced field must appear in the
    /// declared dependencies; otherwise the expression is rejected as a schema error.
    pub fn compile(&mut self, field_id: &str, spec: &ExpressionSpec) -> Result<CompiledExpression> {
        let is_template = spec.mode == ExpressionMode::Text;
        let body = self
            .body_for(is_template, &spec.source)
            .map_err(|e| e.with_field(field_id))?;

        let mut dependencies = spec.dependencies.clone();
        let referenced = body.referenced_fields();

        if is_template {
            for id in referenced {
                if !dependencies.contains(&id) {
                    dependencies.push(id);
                }
            }
        } else {
            let undeclared: Vec<String> = referenced
                .into_iter()
                .filter(|id| !dependencies.contains(id))
                .collect();
            if !undeclared.is_empty() {
                return Err(FormError::schema(
                    field_id,
                    format!(
                        "expression references undeclared dependencies: {}",
                        undeclared.join(", ")
                    ),
                ));
            }
        }

        Ok(CompiledExpression {
            field_id: field_id.to_string(),
            mode: spec.mode,
            body,
            dependencies,
        })
    }

    fn body_for(&mut self, is_template: bool, source: &str) -> Result<Rc<CompiledBody>> {
        let key = (is_template, source.to_string());
        if let Some(body) = self.bodies.get(&key) {
            self.stats.hits += 1;
            return Ok(Rc::clone(body));
        }

        self.stats.misses += 1;
        let body = if is_template {
            CompiledBody::Template(Template::parse(source))
        } else {
            CompiledBody::Expression(parse_expression(source)?)
        };
        let body = Rc::new(body);
        self.bodies.insert(key, Rc::clone(&body));
        log::trace!("Compiled {} '{}'", if is_template { "template" } else { "expression" }, source);
        Ok(body)
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn into_stats(self) -> CacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}
