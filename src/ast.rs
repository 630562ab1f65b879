//! Syntax tree for field expressions

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

/// The closed function library. Names outside this set are rejected by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Round,
    Floor,
    Ceil,
    Abs,
    Sqrt,
    Pow,
    Min,
    Max,
    Clamp,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "round" => Some(Self::Round),
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "abs" => Some(Self::Abs),
            "sqrt" => Some(Self::Sqrt),
            "pow" => Some(Self::Pow),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "clamp" => Some(Self::Clamp),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Pow => "pow",
            Self::Min => "min",
            Self::Max => "max",
            Self::Clamp => "clamp",
        }
    }

    /// Accepted argument counts as (min, max); `None` means variadic.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Round => (1, Some(2)),
            Self::Floor | Self::Ceil | Self::Abs | Self::Sqrt => (1, Some(1)),
            Self::Pow => (2, Some(2)),
            Self::Min | Self::Max => (1, None),
            Self::Clamp => (3, Some(3)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Number(f64),
    String(String),
    Boolean(bool),

    /// Field reference, `path` holds the dotted tail (`price.value` -> ["value"])
    Field { id: String, path: Vec<String> },

    Unary { op: UnaryOp, operand: Box<Expression> },

    Binary { op: BinaryOp, left: Box<Expression>, right: Box<Expression> },

    Ternary {
        condition: Box<Expression>,
        true_value: Box<Expression>,
        false_value: Box<Expression>,
    },

    Call { function: Function, args: Vec<Expression> },
}

impl Expression {
    /// Root field ids referenced anywhere in the tree, in first-occurrence order.
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut Vec<String>) {
        match self {
            Expression::Number(_) | Expression::String(_) | Expression::Boolean(_) => {}
            Expression::Field { id, .. } => {
                if !fields.contains(id) {
                    fields.push(id.clone());
                }
            }
            Expression::Unary { operand, .. } => operand.collect_fields(fields),
            Expression::Binary { left, right, .. } => {
                left.collect_fields(fields);
                right.collect_fields(fields);
            }
            Expression::Ternary { condition, true_value, false_value } => {
                condition.collect_fields(fields);
                true_value.collect_fields(fields);
                false_value.collect_fields(fields);
            }
            Expression::Call { args, .. } => {
                for arg in args {
                    arg.collect_fields(fields);
                }
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(n) => write!(f, "{}", n),
            Expression::String(s) => write!(f, "{:?}", s),
            Expression::Boolean(b) => write!(f, "{}", b),
            Expression::Field { id, path } => {
                write!(f, "{}", id)?;
                for segment in path {
                    write!(f, ".{}", segment)?;
                }
                Ok(())
            }
            Expression::Unary { op: UnaryOp::Negate, operand } => write!(f, "-{}", operand),
            Expression::Unary { op: UnaryOp::Not, operand } => write!(f, "!{}", operand),
            Expression::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expression::Ternary { condition, true_value, false_value } => {
                write!(f, "({} ? {} : {})", condition, true_value, false_value)
            }
            Expression::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: &str) -> Expression {
        Expression::Field { id: id.to_string(), path: Vec::new() }
    }

    #[test]
    fn test_referenced_fields_deduplicated_in_order() {
        let expr = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(field("b")),
            right: Box::new(Expression::Call {
                function: Function::Max,
                args: vec![field("a"), field("b")],
            }),
        };
        assert_eq!(expr.referenced_fields(), vec!["b", "a"]);
    }

    #[test]
    fn test_dotted_reference_reports_root() {
        let expr = Expression::Field { id: "price".to_string(), path: vec!["valid".to_string()] };
        assert_eq!(expr.referenced_fields(), vec!["price"]);
        assert_eq!(expr.to_string(), "price.valid");
    }

    #[test]
    fn test_function_lookup() {
        assert_eq!(Function::from_name("pow"), Some(Function::Pow));
        assert_eq!(Function::from_name("eval"), None);
        assert_eq!(Function::Round.arity(), (1, Some(2)));
        assert_eq!(Function::Max.arity(), (1, None));
    }
}
