//! Guard expressions for conditional activation events.
//!
//! Manifests can gate an activation event with a `when` expression that is
//! evaluated against the context passed to `activate`. The language is a
//! small boolean subset: identifiers with dot paths, string/number/bool/null
//! literals, `!`, `&&`, `||`, `==`, `!=` and parentheses. Expressions are
//! parsed once per distinct string and cached.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use quilt_protocols::ConfigError;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Not,
    And,
    Or,
    Eq,
    Ne,
    LParen,
    RParen,
}

#[derive(Debug)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err("single '=' is not an operator".to_string());
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err("single '&' is not an operator".to_string());
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err("single '|' is not an operator".to_string());
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Literal(Value::String(value)));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number: f64 = text
                    .parse()
                    .map_err(|_| format!("invalid number: {text}"))?;
                let value = serde_json::Number::from_f64(number)
                    .map(Value::Number)
                    .ok_or_else(|| format!("invalid number: {text}"))?;
                tokens.push(Token::Literal(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || chars[i] == '_'
                        || chars[i] == '$'
                        || chars[i] == '.')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                match text.as_str() {
                    "true" => tokens.push(Token::Literal(Value::Bool(true))),
                    "false" => tokens.push(Token::Literal(Value::Bool(false))),
                    "null" => tokens.push(Token::Literal(Value::Null)),
                    _ => tokens.push(Token::Ident(text)),
                }
            }
            other => return Err(format!("unexpected character: {other}")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Eq) => {
                    self.next();
                    let right = self.parse_unary()?;
                    left = Expr::Eq(Box::new(left), Box::new(right));
                }
                Some(Token::Ne) => {
                    self.next();
                    let right = self.parse_unary()?;
                    left = Expr::Ne(Box::new(left), Box::new(right));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".to_string()),
                }
            }
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Ident(path)) => {
                Ok(Expr::Path(path.split('.').map(str::to_string).collect()))
            }
            Some(other) => Err(format!("unexpected token: {other:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

impl Expr {
    fn resolve(&self, context: Option<&Map<String, Value>>) -> Value {
        match self {
            Expr::Literal(value) => value.clone(),
            Expr::Path(path) => {
                let Some(context) = context else {
                    return Value::Null;
                };
                let mut current = context.get(&path[0]).cloned().unwrap_or(Value::Null);
                for segment in &path[1..] {
                    current = match current {
                        Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
                        _ => Value::Null,
                    };
                }
                current
            }
            _ => Value::Bool(self.evaluate(context)),
        }
    }

    fn evaluate(&self, context: Option<&Map<String, Value>>) -> bool {
        match self {
            Expr::Literal(value) => truthy(value),
            Expr::Path(_) => truthy(&self.resolve(context)),
            Expr::Not(inner) => !inner.evaluate(context),
            Expr::And(left, right) => left.evaluate(context) && right.evaluate(context),
            Expr::Or(left, right) => left.evaluate(context) || right.evaluate(context),
            Expr::Eq(left, right) => left.resolve(context) == right.resolve(context),
            Expr::Ne(left, right) => left.resolve(context) != right.resolve(context),
        }
    }
}

/// Parse-once cache keyed by the raw expression string.
pub struct GuardCache {
    cache: RwLock<HashMap<String, Arc<Expr>>>,
}

impl Default for GuardCache {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardCache {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn evaluate(
        &self,
        expr: &str,
        context: Option<&Map<String, Value>>,
    ) -> Result<bool, ConfigError> {
        // Fast paths, never cached
        let trimmed = expr.trim();
        if trimmed.is_empty() || trimmed == "true" {
            return Ok(true);
        }
        if trimmed == "false" {
            return Ok(false);
        }

        if let Some(parsed) = self.cache.read().get(trimmed).cloned() {
            return Ok(parsed.evaluate(context));
        }

        let parsed = Arc::new(parse(trimmed).map_err(|reason| ConfigError::GuardExpression {
            expr: trimmed.to_string(),
            reason,
        })?);
        self.cache
            .write()
            .insert(trimmed.to_string(), parsed.clone());
        Ok(parsed.evaluate(context))
    }

    #[cfg(test)]
    fn cached(&self, expr: &str) -> bool {
        self.cache.read().contains_key(expr)
    }
}

fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing tokens after expression".to_string());
    }
    Ok(expr)
}

#[cfg(test)]
#[path = "expr_tests.rs"]
mod tests;
