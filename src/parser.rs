//! Recursive descent parser for field expressions
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! ternary    := or ( "?" ternary ":" ternary )?
//! or         := and ( "||" and )*
//! and        := equality ( "&&" equality )*
//! equality   := comparison ( ( "==" | "!=" ) comparison )*
//! comparison := additive ( ( "<" | "<=" | ">" | ">=" ) additive )*
//! additive   := term ( ( "+" | "-" ) term )*
//! term       := unary ( ( "*" | "/" ) unary )*
//! unary      := ( "-" | "!" ) unary | primary
//! primary    := number | string | boolean | field ( "." name )* | call | "(" ternary ")"
//! call       := function "(" ( ternary ( "," ternary )* )? ")"
//! ```

use crate::ast::{BinaryOp, Expression, Function, UnaryOp};
use crate::error::{FormError, Result};
use crate::lexer::{Lexer, Token, TokenType};

/// Limit on syntax tree depth. Parentheses, unary and ternary operators each add a
/// level, and so does every operator folded into a left-associative chain.
const MAX_DEPTH: usize = 128;

/// Limit on operator, ternary and call nodes in one expression.
const MAX_NODES: usize = 1000;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
    nodes: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            depth: 0,
            nodes: 0,
        }
    }

    pub fn parse(&mut self) -> Result<Expression> {
        if self.check(&TokenType::Eof) {
            return Err(self.error_at_current("Empty expression"));
        }

        let expr = self.parse_ternary()?;

        if !self.is_at_end() {
            return Err(self.error_at_current("Unexpected token after expression"));
        }

        Ok(expr)
    }

    fn parse_ternary(&mut self) -> Result<Expression> {
        self.enter()?;
        let condition = self.parse_or()?;

        let result = if self.match_token(&TokenType::Question) {
            self.count_node()?;
            let true_value = self.parse_ternary()?;
            self.consume(TokenType::Colon, "Expected ':' in ternary expression")?;
            let false_value = self.parse_ternary()?;

            Expression::Ternary {
                condition: Box::new(condition),
                true_value: Box::new(true_value),
                false_value: Box::new(false_value),
            }
        } else {
            condition
        };

        self.leave();
        Ok(result)
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_and()?;
        let mut folded = 0;
        while self.match_token(&TokenType::OrOr) {
            self.enter()?;
            self.count_node()?;
            folded += 1;
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        self.depth -= folded;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_equality()?;
        let mut folded = 0;
        while self.match_token(&TokenType::AndAnd) {
            self.enter()?;
            self.count_node()?;
            folded += 1;
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        self.depth -= folded;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expression> {
        let mut left = self.parse_comparison()?;
        let mut folded = 0;
        loop {
            let op = match self.peek().token_type {
                TokenType::EqualEquals => BinaryOp::Equal,
                TokenType::NotEquals => BinaryOp::NotEqual,
                _ => break,
            };
            self.advance();
            self.enter()?;
            self.count_node()?;
            folded += 1;
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
        self.depth -= folded;
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let mut left = self.parse_additive()?;
        let mut folded = 0;
        loop {
            let op = match self.peek().token_type {
                TokenType::LessThan => BinaryOp::LessThan,
                TokenType::LessThanOrEqual => BinaryOp::LessThanOrEqual,
                TokenType::GreaterThan => BinaryOp::GreaterThan,
                TokenType::GreaterThanOrEqual => BinaryOp::GreaterThanOrEqual,
                _ => break,
            };
            self.advance();
            self.enter()?;
            self.count_node()?;
            folded += 1;
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        self.depth -= folded;
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut left = self.parse_term()?;
        let mut folded = 0;
        loop {
            let op = match self.peek().token_type {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            self.enter()?;
            self.count_node()?;
            folded += 1;
            let right = self.parse_term()?;
            left = binary(op, left, right);
        }
        self.depth -= folded;
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expression> {
        let mut left = self.parse_unary()?;
        let mut folded = 0;
        loop {
            let op = match self.peek().token_type {
                TokenType::Star => BinaryOp::Multiply,
                TokenType::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.advance();
            self.enter()?;
            self.count_node()?;
            folded += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        self.depth -= folded;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let op = match self.peek().token_type {
            TokenType::Minus => UnaryOp::Negate,
            TokenType::Bang => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.advance();

        self.enter()?;
        self.count_node()?;
        let operand = self.parse_unary()?;
        self.leave();

        Ok(Expression::Unary { op, operand: Box::new(operand) })
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        match &self.peek().token_type {
            TokenType::Number(n) => {
                let value = *n;
                self.advance();
                Ok(Expression::Number(value))
            }
            TokenType::String(s) => {
                let value = s.clone();
                self.advance();
                Ok(Expression::String(value))
            }
            TokenType::Boolean(b) => {
                let value = *b;
                self.advance();
                Ok(Expression::Boolean(value))
            }
            TokenType::Identifier(name) => {
                let name = name.clone();
                self.advance();
                if self.check(&TokenType::LeftParen) {
                    self.parse_call(name)
                } else {
                    self.parse_field_reference(name)
                }
            }
            TokenType::LeftParen => {
                self.advance(); // consume '('
                let expr = self.parse_ternary()?;
                self.consume(TokenType::RightParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            _ => Err(self.error_at_current("Expected expression")),
        }
    }

    fn parse_field_reference(&mut self, id: String) -> Result<Expression> {
        let mut path = Vec::new();

        while self.match_token(&TokenType::Dot) {
            match &self.peek().token_type {
                TokenType::Identifier(segment) => {
                    path.push(segment.clone());
                    self.advance();
                }
                _ => return Err(self.error_at_current("Expected member name after '.'")),
            }
        }

        Ok(Expression::Field { id, path })
    }

    fn parse_call(&mut self, name: String) -> Result<Expression> {
        let name_token = self.previous().clone();
        let function = Function::from_name(&name).ok_or_else(|| {
            FormError::parse_anonymous(
                name_token.position,
                name_token.token_type.to_string(),
                format!("Unknown function '{}'", name),
            )
        })?;

        self.consume(TokenType::LeftParen, "Expected '(' after function name")?;
        self.count_node()?;

        let mut args = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                args.push(self.parse_ternary()?);
                if !self.match_token(&TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expected ')' after function arguments")?;

        let (min, max) = function.arity();
        let arity_ok = args.len() >= min && max.map_or(true, |max| args.len() <= max);
        if !arity_ok {
            let expected = match max {
                Some(max) if max == min => format!("{}", min),
                Some(max) => format!("{} to {}", min, max),
                None => format!("at least {}", min),
            };
            return Err(FormError::parse_anonymous(
                name_token.position,
                name_token.token_type.to_string(),
                format!(
                    "Function '{}' expects {} argument(s), got {}",
                    function.name(),
                    expected,
                    args.len()
                ),
            ));
        }

        Ok(Expression::Call { function, args })
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_at_current("Expression nested too deeply"));
        }
        Ok(())
    }

    fn count_node(&mut self) -> Result<()> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(self.error_at_current("Expression has too many operators"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn error_at_current(&self, message: &str) -> FormError {
        let token = self.peek();
        FormError::parse_anonymous(token.position, token.token_type.to_string(), message)
    }

    fn match_token(&mut self, token_type: &TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, token_type: &TokenType) -> bool {
        std::mem::discriminant(&self.peek().token_type) == std::mem::discriminant(token_type)
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<&Token> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(self.error_at_current(message))
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().token_type, TokenType::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
}

fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Tokenize and parse an expression source string.
pub fn parse_expression(source: &str) -> Result<Expression> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse()
}
