//! Lexical analysis for field expressions

use crate::error::{FormError, Result};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn number_regex() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| {
        Regex::new(r"^[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?$").expect("number pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,

    // Comparison
    EqualEquals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    AndAnd,
    OrOr,
    Bang,

    // Punctuation
    Question,
    Colon,
    LeftParen,
    RightParen,
    Comma,
    Dot,

    // Literals
    String(String),
    Number(f64),
    Boolean(bool),
    Identifier(String),

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    /// Zero-based character offset into the expression source
    pub position: usize,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Plus => write!(f, "'+'"),
            TokenType::Minus => write!(f, "'-'"),
            TokenType::Star => write!(f, "'*'"),
            TokenType::Slash => write!(f, "'/'"),
            TokenType::EqualEquals => write!(f, "'=='"),
            TokenType::NotEquals => write!(f, "'!='"),
            TokenType::LessThan => write!(f, "'<'"),
            TokenType::LessThanOrEqual => write!(f, "'<='"),
            TokenType::GreaterThan => write!(f, "'>'"),
            TokenType::GreaterThanOrEqual => write!(f, "'>='"),
            TokenType::AndAnd => write!(f, "'&&'"),
            TokenType::OrOr => write!(f, "'||'"),
            TokenType::Bang => write!(f, "'!'"),
            TokenType::Question => write!(f, "'?'"),
            TokenType::Colon => write!(f, "':'"),
            TokenType::LeftParen => write!(f, "'('"),
            TokenType::RightParen => write!(f, "')'"),
            TokenType::Comma => write!(f, "','"),
            TokenType::Dot => write!(f, "'.'"),
            TokenType::String(s) => write!(f, "string(\"{}\")", s),
            TokenType::Number(n) => write!(f, "number({})", n),
            TokenType::Boolean(b) => write!(f, "boolean({})", b),
            TokenType::Identifier(id) => write!(f, "identifier({})", id),
            TokenType::Eof => write!(f, "end of expression"),
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }
            tokens.push(self.next_token()?);
        }

        tokens.push(Token {
            token_type: TokenType::Eof,
            position: self.position,
        });

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token> {
        let start = self.position;
        let ch = self.advance();

        let token_type = match ch {
            '+' => TokenType::Plus,
            '-' => TokenType::Minus,
            '*' => TokenType::Star,
            '/' => TokenType::Slash,
            '?' => TokenType::Question,
            ':' => TokenType::Colon,
            '(' => TokenType::LeftParen,
            ')' => TokenType::RightParen,
            ',' => TokenType::Comma,
            '.' if self.peek().map_or(false, |c| c.is_ascii_digit()) => {
                return Err(FormError::parse_anonymous(
                    start,
                    "'.'",
                    "Numbers must start with a digit (write 0.5, not .5)",
                ));
            }
            '.' => TokenType::Dot,
            '=' => {
                if self.match_char('=') {
                    TokenType::EqualEquals
                } else {
                    return Err(FormError::parse_anonymous(
                        start,
                        "'='",
                        "Assignment is not supported; use '==' for comparison",
                    ));
                }
            }
            '!' => {
                if self.match_char('=') {
                    TokenType::NotEquals
                } else {
                    TokenType::Bang
                }
            }
            '<' => {
                if self.match_char('=') {
                    TokenType::LessThanOrEqual
                } else {
                    TokenType::LessThan
                }
            }
            '>' => {
                if self.match_char('=') {
                    TokenType::GreaterThanOrEqual
                } else {
                    TokenType::GreaterThan
                }
            }
            '&' => {
                if self.match_char('&') {
                    TokenType::AndAnd
                } else {
                    return Err(FormError::parse_anonymous(start, "'&'", "Expected '&&'"));
                }
            }
            '|' => {
                if self.match_char('|') {
                    TokenType::OrOr
                } else {
                    return Err(FormError::parse_anonymous(start, "'|'", "Expected '||'"));
                }
            }
            '"' | '\'' => self.read_string(ch, start)?,
            c if c.is_ascii_digit() => self.read_number(start)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(start),
            other => {
                return Err(FormError::parse_anonymous(
                    start,
                    format!("'{}'", other),
                    "Unexpected character",
                ));
            }
        };

        Ok(Token { token_type, position: start })
    }

    fn read_string(&mut self, quote: char, start: usize) -> Result<TokenType> {
        let mut value = String::new();

        while let Some(ch) = self.peek() {
            if ch == quote {
                self.advance();
                return Ok(TokenType::String(value));
            }
            self.advance();
            if ch == '\\' {
                let escaped = match self.peek() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some('\'') => '\'',
                    Some(other) => {
                        return Err(FormError::parse_anonymous(
                            self.position,
                            format!("'\\{}'", other),
                            "Unknown escape sequence",
                        ));
                    }
                    None => break,
                };
                self.advance();
                value.push(escaped);
            } else {
                value.push(ch);
            }
        }

        Err(FormError::parse_anonymous(start, format!("'{}'", quote), "Unterminated string literal"))
    }

    fn read_number(&mut self, start: usize) -> Result<TokenType> {
        while let Some(ch) = self.peek() {
            let exponent_sign = (ch == '+' || ch == '-')
                && matches!(self.input.get(self.position.wrapping_sub(1)), Some('e') | Some('E'));
            if ch.is_ascii_digit() || ch == '.' || ch == 'e' || ch == 'E' || exponent_sign {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();
        if !number_regex().is_match(&text) {
            return Err(FormError::parse_anonymous(
                start,
                format!("'{}'", text),
                "Malformed number literal",
            ));
        }

        text.parse::<f64>()
            .map(TokenType::Number)
            .map_err(|_| FormError::parse_anonymous(start, format!("'{}'", text), "Malformed number literal"))
    }

    fn read_identifier(&mut self, start: usize) -> TokenType {
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();
        match text.as_str() {
            "true" => TokenType::Boolean(true),
            "false" => TokenType::Boolean(false),
            _ => TokenType::Identifier(text),
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.input[self.position];
        self.position += 1;
        ch
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_types(input: &str) -> Vec<TokenType> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn test_operators() {
        let tokens = token_types("+ - * / == != < <= > >= && || ! ? : ( ) , .");
        assert_eq!(
            tokens,
            vec![
                TokenType::Plus,
                TokenType::Minus,
                TokenType::Star,
                TokenType::Slash,
                TokenType::EqualEquals,
                TokenType::NotEquals,
                TokenType::LessThan,
                TokenType::LessThanOrEqual,
                TokenType::GreaterThan,
                TokenType::GreaterThanOrEqual,
                TokenType::AndAnd,
                TokenType::OrOr,
                TokenType::Bang,
                TokenType::Question,
                TokenType::Colon,
                TokenType::LeftParen,
                TokenType::RightParen,
                TokenType::Comma,
                TokenType::Dot,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = token_types("42 2.75 1e3 2.5E-2");
        assert_eq!(tokens[0], TokenType::Number(42.0));
        assert_eq!(tokens[1], TokenType::Number(2.75));
        assert_eq!(tokens[2], TokenType::Number(1000.0));
        assert_eq!(tokens[3], TokenType::Number(0.025));
    }

    #[test]
    fn test_number_pattern_compiled_once() {
        assert!(std::ptr::eq(number_regex(), number_regex()));
        let first = token_types("7");
        let second = token_types("7");
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_number() {
        let err = Lexer::new("1.2.3").tokenize().unwrap_err();
        match err {
            FormError::Parse { position, token, .. } => {
                assert_eq!(position, 0);
                assert_eq!(token, "'1.2.3'");
            }
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_string_literals() {
        let tokens = token_types(r#""hello" 'world' "a\"b""#);
        assert_eq!(tokens[0], TokenType::String("hello".to_string()));
        assert_eq!(tokens[1], TokenType::String("world".to_string()));
        assert_eq!(tokens[2], TokenType::String("a\"b".to_string()));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(Lexer::new("\"abc").tokenize().is_err());
    }

    #[test]
    fn test_identifiers_and_booleans() {
        let tokens = token_types("weight true false field_2");
        assert_eq!(tokens[0], TokenType::Identifier("weight".to_string()));
        assert_eq!(tokens[1], TokenType::Boolean(true));
        assert_eq!(tokens[2], TokenType::Boolean(false));
        assert_eq!(tokens[3], TokenType::Identifier("field_2".to_string()));
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("a  + 12").tokenize().unwrap();
        assert_eq!(tokens[0].position, 0);
        assert_eq!(tokens[1].position, 3);
        assert_eq!(tokens[2].position, 5);
        assert_eq!(tokens[3].position, 7);
    }

    #[test]
    fn test_rejects_unsupported_characters() {
        for input in ["a = 1", "a & b", "a | b", "x; y", "{x}", "a[0]"] {
            assert!(Lexer::new(input).tokenize().is_err(), "Expected error for: '{}'", input);
        }
    }
}
