//! Tree-walking evaluator for parsed field expressions

use crate::ast::{BinaryOp, Expression, Function, UnaryOp};
use crate::error::EvalError;
use crate::types::{Value, ValueContext};
use std::cmp::Ordering;

pub type EvalResult = std::result::Result<Value, EvalError>;

/// Evaluates expressions against one pass's `ValueContext`.
///
/// Identifiers resolve only if they are listed in `allowed`; a reference to a field
/// outside the declared dependencies is reported as unresolved even when the context
/// happens to carry a value for it.
pub struct Evaluator<'a> {
    context: &'a ValueContext,
    allowed: &'a [String],
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a ValueContext, allowed: &'a [String]) -> Self {
        Self { context, allowed }
    }

    pub fn evaluate(&self, expr: &Expression) -> EvalResult {
        match expr {
            Expression::Number(n) => Ok(Value::Number(*n)),
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Boolean(b) => Ok(Value::Boolean(*b)),
            Expression::Field { id, path } => self.resolve_field(id, path),
            Expression::Unary { op, operand } => {
                let value = self.evaluate(operand)?;
                match op {
                    UnaryOp::Negate => Ok(Value::Number(-numeric_operand(&value, "-")?)),
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                }
            }
            Expression::Binary { op: BinaryOp::And, left, right } => {
                if !self.evaluate(left)?.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
            }
            Expression::Binary { op: BinaryOp::Or, left, right } => {
                if self.evaluate(left)?.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
            }
            Expression::Binary { op, left, right } => {
                let left_val = self.evaluate(left)?;
                let right_val = self.evaluate(right)?;
                apply_binary(*op, &left_val, &right_val)
            }
            Expression::Ternary { condition, true_value, false_value } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(true_value)
                } else {
                    self.evaluate(false_value)
                }
            }
            Expression::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let value = self.evaluate(arg)?;
                    values.push(numeric_operand(&value, function.name())?);
                }
                Ok(Value::Number(call_function(*function, &values)))
            }
        }
    }

    fn resolve_field(&self, id: &str, path: &[String]) -> EvalResult {
        if !self.allowed.iter().any(|allowed| allowed == id) {
            return Err(EvalError::unresolved(id));
        }

        let snapshot = self.context.get(id).ok_or_else(|| EvalError::unresolved(id))?;

        match path {
            [] => Ok(snapshot.value.clone()),
            [member] if member == "value" => Ok(snapshot.value.clone()),
            [member] if member == "valid" => Ok(Value::Boolean(snapshot.valid)),
            [member] if member == "required" => Ok(Value::Boolean(snapshot.required)),
            _ => Err(EvalError::unresolved(format!("{}.{}", id, path.join(".")))),
        }
    }
}

fn numeric_operand(value: &Value, operator: &str) -> Result<f64, EvalError> {
    value.as_number().ok_or_else(|| {
        EvalError::type_error(format!(
            "cannot use {} value '{}' as a number in '{}'",
            value.type_name(),
            value,
            operator
        ))
    })
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult {
    match op {
        BinaryOp::Add => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => Ok(Value::Number(a + b)),
            _ if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", left, right)))
            }
            _ => Err(EvalError::type_error(format!(
                "cannot add {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        },
        BinaryOp::Subtract => Ok(Value::Number(
            numeric_operand(left, "-")? - numeric_operand(right, "-")?,
        )),
        BinaryOp::Multiply => Ok(Value::Number(
            numeric_operand(left, "*")? * numeric_operand(right, "*")?,
        )),
        BinaryOp::Divide => {
            let dividend = numeric_operand(left, "/")?;
            let divisor = numeric_operand(right, "/")?;
            if divisor == 0.0 {
                Ok(Value::Number(f64::NAN))
            } else {
                Ok(Value::Number(dividend / divisor))
            }
        }
        BinaryOp::Equal => Ok(Value::Boolean(values_equal(left, right))),
        BinaryOp::NotEqual => Ok(Value::Boolean(!values_equal(left, right))),
        BinaryOp::LessThan
        | BinaryOp::LessThanOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterThanOrEqual => {
            let ordering = compare_values(left, right, op)?;
            let result = match (op, ordering) {
                (_, None) => false,
                (BinaryOp::LessThan, Some(o)) => o == Ordering::Less,
                (BinaryOp::LessThanOrEqual, Some(o)) => o != Ordering::Greater,
                (BinaryOp::GreaterThan, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            };
            Ok(Value::Boolean(result))
        }
        // Short-circuit operators are handled by the evaluator before operands are computed
        BinaryOp::And => Ok(Value::Boolean(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Boolean(left.is_truthy() || right.is_truthy())),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return a == b;
    }
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

/// `None` means the operands are unordered (a NaN was involved).
fn compare_values(left: &Value, right: &Value, op: BinaryOp) -> Result<Option<Ordering>, EvalError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(a.partial_cmp(&b));
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        _ => Err(EvalError::type_error(format!(
            "cannot compare {} and {} with '{}'",
            left.type_name(),
            right.type_name(),
            op.symbol()
        ))),
    }
}

fn call_function(function: Function, args: &[f64]) -> f64 {
    match function {
        Function::Round => {
            let digits = args.get(1).copied().unwrap_or(0.0).trunc();
            let factor = 10f64.powf(digits);
            round_half_up(args[0] * factor) / factor
        }
        Function::Floor => args[0].floor(),
        Function::Ceil => args[0].ceil(),
        Function::Abs => args[0].abs(),
        Function::Sqrt => args[0].sqrt(),
        Function::Pow => args[0].powf(args[1]),
        Function::Min => fold_propagating_nan(args, f64::min),
        Function::Max => fold_propagating_nan(args, f64::max),
        Function::Clamp => {
            let (x, lo, hi) = (args[0], args[1], args[2]);
            if x.is_nan() || lo > hi {
                f64::NAN
            } else {
                x.max(lo).min(hi)
            }
        }
    }
}

/// Halves round toward positive infinity, matching form-calculator conventions.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn fold_propagating_nan(args: &[f64], pick: fn(f64, f64) -> f64) -> f64 {
    if args.iter().any(|a| a.is_nan()) {
        return f64::NAN;
    }
    args.iter().copied().reduce(pick).unwrap_or(f64::NAN)
}
