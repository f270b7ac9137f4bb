//! Sandboxed trigger-expression evaluator.
//!
//! Expressions decide the state of an expression-type trigger, e.g.
//! `t1 > 10 && t2 < 5 ? ERROR : (t1 > 5 ? WARN : OK)`. The grammar is a
//! single expression form: ternary conditionals, boolean `||`/`&&`,
//! comparisons, arithmetic, unary negation and parentheses. Identifiers
//! resolve to the bound target values (`t1`…`tN`), `warn_value` /
//! `error_value` when the trigger defines them, and the state constants
//! `OK`, `WARN`, `ERROR`, `NODATA`. The result must be a state.

use std::collections::HashMap;

use tocsin_common::types::State;

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("Expression: unexpected character '{0}'")]
    UnexpectedCharacter(char),

    #[error("Expression: unexpected end of input")]
    UnexpectedEnd,

    #[error("Expression: unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("Expression: unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("Expression: {0}")]
    Type(String),

    #[error("Expression: result is not a state: {0}")]
    NotAState(String),
}

type Result<T> = std::result::Result<T, ExpressionError>;

/// Named values available to an expression.
#[derive(Debug, Default, Clone)]
pub struct Bindings {
    values: HashMap<String, f64>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Evaluates `source` with the given bindings. The expression must
/// produce one of OK, WARN, ERROR, NODATA.
pub fn evaluate(source: &str, bindings: &Bindings) -> Result<State> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;
    parser.expect_end()?;
    match eval(&expr, bindings)? {
        Value::State(state) => Ok(state),
        other => Err(ExpressionError::NotAState(other.describe())),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Or,
    And,
    Not,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Plus,
    Minus,
    Star,
    Slash,
    Question,
    Colon,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(name) => write!(f, "{name}"),
            Token::Or => write!(f, "||"),
            Token::And => write!(f, "&&"),
            Token::Not => write!(f, "!"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedToken(literal.clone()))?;
                tokens.push(Token::Number(number));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_some() {
                    tokens.push(Token::Or);
                } else {
                    return Err(ExpressionError::UnexpectedCharacter('|'));
                }
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_some() {
                    tokens.push(Token::And);
                } else {
                    return Err(ExpressionError::UnexpectedCharacter('&'));
                }
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Eq);
                } else {
                    return Err(ExpressionError::UnexpectedCharacter('='));
                }
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Not);
                }
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '?' => {
                chars.next();
                tokens.push(Token::Question);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            other => return Err(ExpressionError::UnexpectedCharacter(other)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ExpressionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(ExpressionError::UnexpectedToken(token.to_string()))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
        }
    }

    /// Ternary is right-associative: `a ? b : c ? d : e` parses as
    /// `a ? b : (c ? d : e)`.
    fn expression(&mut self) -> Result<Expr> {
        let condition = self.or_expr()?;
        if self.eat(&Token::Question) {
            let then_branch = self.expression()?;
            self.expect(Token::Colon)?;
            let else_branch = self.expression()?;
            return Ok(Expr::Ternary(
                Box::new(condition),
                Box::new(then_branch),
                Box::new(else_branch),
            ));
        }
        Ok(condition)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat(&Token::Not) {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.next()? {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            token => Err(ExpressionError::UnexpectedToken(token.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
    State(State),
}

impl Value {
    fn describe(self) -> String {
        match self {
            Value::Number(n) => format!("number {n}"),
            Value::Bool(b) => format!("boolean {b}"),
            Value::State(s) => format!("state {s}"),
        }
    }

    fn as_number(self) -> Result<f64> {
        match self {
            Value::Number(n) => Ok(n),
            other => Err(ExpressionError::Type(format!(
                "expected a number, got {}",
                other.describe()
            ))),
        }
    }

    fn as_bool(self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(ExpressionError::Type(format!(
                "expected a boolean, got {}",
                other.describe()
            ))),
        }
    }
}

fn eval(expr: &Expr, bindings: &Bindings) -> Result<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Ident(name) => resolve(name, bindings),
        Expr::Unary(op, inner) => {
            let value = eval(inner, bindings)?;
            match op {
                UnaryOp::Neg => Ok(Value::Number(-value.as_number()?)),
                UnaryOp::Not => Ok(Value::Bool(!value.as_bool()?)),
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, bindings)?;
            // Short-circuit the boolean operators.
            match op {
                BinaryOp::Or => {
                    if left.as_bool()? {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(eval(right, bindings)?.as_bool()?));
                }
                BinaryOp::And => {
                    if !left.as_bool()? {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(eval(right, bindings)?.as_bool()?));
                }
                _ => {}
            }
            let right = eval(right, bindings)?;
            match op {
                BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right)?)),
                BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right)?)),
                BinaryOp::Lt => Ok(Value::Bool(left.as_number()? < right.as_number()?)),
                BinaryOp::Le => Ok(Value::Bool(left.as_number()? <= right.as_number()?)),
                BinaryOp::Gt => Ok(Value::Bool(left.as_number()? > right.as_number()?)),
                BinaryOp::Ge => Ok(Value::Bool(left.as_number()? >= right.as_number()?)),
                BinaryOp::Add => Ok(Value::Number(left.as_number()? + right.as_number()?)),
                BinaryOp::Sub => Ok(Value::Number(left.as_number()? - right.as_number()?)),
                BinaryOp::Mul => Ok(Value::Number(left.as_number()? * right.as_number()?)),
                BinaryOp::Div => Ok(Value::Number(left.as_number()? / right.as_number()?)),
                BinaryOp::Or | BinaryOp::And => unreachable!("handled above"),
            }
        }
        Expr::Ternary(condition, then_branch, else_branch) => {
            if eval(condition, bindings)?.as_bool()? {
                eval(then_branch, bindings)
            } else {
                eval(else_branch, bindings)
            }
        }
    }
}

fn values_equal(left: Value, right: Value) -> Result<bool> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::State(a), Value::State(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (a, b) => Err(ExpressionError::Type(format!(
            "cannot compare {} with {}",
            a.describe(),
            b.describe()
        ))),
    }
}

fn resolve(name: &str, bindings: &Bindings) -> Result<Value> {
    match name {
        "OK" => Ok(Value::State(State::Ok)),
        "WARN" => Ok(Value::State(State::Warn)),
        "ERROR" => Ok(Value::State(State::Error)),
        "NODATA" => Ok(Value::State(State::Nodata)),
        _ => bindings
            .get(name)
            .map(Value::Number)
            .ok_or_else(|| ExpressionError::UnknownIdentifier(name.to_string())),
    }
}
