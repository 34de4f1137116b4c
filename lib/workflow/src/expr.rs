//! A small sandboxed expression language for `set_variable` nodes.
//!
//! Supports numeric and string literals, variable references, arithmetic,
//! comparison, and boolean operators. No function calls, no side effects.
//! Evaluation reads the run context only; a missing variable reads as the
//! empty string.

use crate::context::{RunContext, VarValue};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionError {
    Parse { position: usize, message: String },
    Eval { message: String },
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { position, message } => {
                write!(f, "parse error at offset {position}: {message}")
            }
            Self::Eval { message } => write!(f, "evaluation error: {message}"),
        }
    }
}

impl std::error::Error for ExpressionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(VarValue),
    Var(String),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn lex(input: &str) -> Result<Vec<(usize, Token)>, ExpressionError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                let op = match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    _ => "/",
                };
                tokens.push((i, Token::Op(op)));
                i += 1;
            }
            '=' | '!' | '<' | '>' => {
                let two = input.get(i..i + 2);
                let (op, len) = match (c, two) {
                    ('=', Some("==")) => ("==", 2),
                    ('!', Some("!=")) => ("!=", 2),
                    ('<', Some("<=")) => ("<=", 2),
                    ('>', Some(">=")) => (">=", 2),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    ('!', _) => ("!", 1),
                    _ => {
                        return Err(ExpressionError::Parse {
                            position: i,
                            message: "expected '==' after '='".to_string(),
                        });
                    }
                };
                tokens.push((i, Token::Op(op)));
                i += len;
            }
            '&' | '|' => {
                let expected = if c == '&' { "&&" } else { "||" };
                if input.get(i..i + 2) == Some(expected) {
                    tokens.push((i, Token::Op(expected)));
                    i += 2;
                } else {
                    return Err(ExpressionError::Parse {
                        position: i,
                        message: format!("expected '{expected}'"),
                    });
                }
            }
            '\'' | '"' => {
                // The quote is ASCII, so a byte scan lands on a char
                // boundary and the literal body slices as valid UTF-8.
                let quote = bytes[i];
                let start = i;
                let Some(len) = bytes[i + 1..].iter().position(|&b| b == quote) else {
                    return Err(ExpressionError::Parse {
                        position: start,
                        message: "unterminated string".to_string(),
                    });
                };
                let value = input[i + 1..i + 1 + len].to_string();
                i += len + 2;
                tokens.push((start, Token::Str(value)));
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_digit() || bytes[i] == b'.')
                {
                    i += 1;
                }
                let number: f64 = input[start..i].parse().map_err(|_| ExpressionError::Parse {
                    position: start,
                    message: format!("bad number '{}'", &input[start..i]),
                })?;
                tokens.push((start, Token::Number(number)));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((start, Token::Ident(input[start..i].to_string())));
            }
            _ => {
                let ch = input[i..].chars().next().unwrap_or(c);
                return Err(ExpressionError::Parse {
                    position: i,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token.map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(p, _)| *p)
    }

    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        if let Some(Token::Op(op)) = self.peek()
            && ops.contains(op)
        {
            let op = *op;
            self.pos += 1;
            return Some(op);
        }
        None
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            position: self.position(),
            message: message.into(),
        }
    }

    // Precedence climbing, loosest first.
    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.and_expr()?;
        while self.eat_op(&["||"]).is_some() {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.equality()?;
        while self.eat_op(&["&&"]).is_some() {
            let rhs = self.equality()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.comparison()?;
        while let Some(op) = self.eat_op(&["==", "!="]) {
            let op = if op == "==" { BinOp::Eq } else { BinOp::Ne };
            let rhs = self.comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.additive()?;
        while let Some(op) = self.eat_op(&["<=", ">=", "<", ">"]) {
            let op = match op {
                "<=" => BinOp::Le,
                ">=" => BinOp::Ge,
                "<" => BinOp::Lt,
                _ => BinOp::Gt,
            };
            let rhs = self.additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let op = if op == "+" { BinOp::Add } else { BinOp::Sub };
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let op = if op == "*" { BinOp::Mul } else { BinOp::Div };
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_op(&["-"]).is_some() {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.eat_op(&["!"]).is_some() {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(VarValue::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(VarValue::Str(s))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(VarValue::Bool(true))),
                "false" => Ok(Expr::Literal(VarValue::Bool(false))),
                _ => Ok(Expr::Var(name)),
            },
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(token) => Err(self.error(format!("unexpected token {token:?}"))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

/// Parses an expression string.
///
/// # Errors
///
/// Returns a parse error with the offending offset.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = lex(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    };
    let expr = parser.expr()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing input after expression"));
    }
    Ok(expr)
}

fn eval_error(message: impl Into<String>) -> ExpressionError {
    ExpressionError::Eval {
        message: message.into(),
    }
}

/// Evaluates a parsed expression against a run context.
///
/// # Errors
///
/// Returns an error for division by zero or a non-numeric operand to an
/// arithmetic operator.
pub fn eval(expr: &Expr, ctx: &RunContext) -> Result<VarValue, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => Ok(ctx
            .get(name)
            .cloned()
            .unwrap_or_else(|| VarValue::Str(String::new()))),
        Expr::Unary { op, operand } => {
            let value = eval(operand, ctx)?;
            match op {
                UnaryOp::Neg => {
                    let n = value
                        .as_number()
                        .ok_or_else(|| eval_error("cannot negate a non-number"))?;
                    Ok(VarValue::Number(-n))
                }
                UnaryOp::Not => Ok(VarValue::Bool(!value.is_truthy())),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            // Short-circuit the boolean operators.
            match op {
                BinOp::And => {
                    let left = eval(lhs, ctx)?;
                    if !left.is_truthy() {
                        return Ok(VarValue::Bool(false));
                    }
                    return Ok(VarValue::Bool(eval(rhs, ctx)?.is_truthy()));
                }
                BinOp::Or => {
                    let left = eval(lhs, ctx)?;
                    if left.is_truthy() {
                        return Ok(VarValue::Bool(true));
                    }
                    return Ok(VarValue::Bool(eval(rhs, ctx)?.is_truthy()));
                }
                _ => {}
            }
            let left = eval(lhs, ctx)?;
            let right = eval(rhs, ctx)?;
            match op {
                BinOp::Add => {
                    // '+' adds when both sides coerce to numbers and
                    // concatenates otherwise.
                    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
                        Ok(VarValue::Number(a + b))
                    } else {
                        Ok(VarValue::Str(format!("{}{}", left.render(), right.render())))
                    }
                }
                BinOp::Sub | BinOp::Mul | BinOp::Div => {
                    let a = left
                        .as_number()
                        .ok_or_else(|| eval_error("arithmetic on a non-number"))?;
                    let b = right
                        .as_number()
                        .ok_or_else(|| eval_error("arithmetic on a non-number"))?;
                    let result = match op {
                        BinOp::Sub => a - b,
                        BinOp::Mul => a * b,
                        _ => {
                            if b == 0.0 {
                                return Err(eval_error("division by zero"));
                            }
                            a / b
                        }
                    };
                    Ok(VarValue::Number(result))
                }
                BinOp::Eq => Ok(VarValue::Bool(values_equal(&left, &right))),
                BinOp::Ne => Ok(VarValue::Bool(!values_equal(&left, &right))),
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                    let ordering = compare(&left, &right)?;
                    let result = match op {
                        BinOp::Lt => ordering.is_lt(),
                        BinOp::Le => ordering.is_le(),
                        BinOp::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    };
                    Ok(VarValue::Bool(result))
                }
                BinOp::And | BinOp::Or => unreachable!("handled above"),
            }
        }
    }
}

/// Parses then evaluates in one step.
///
/// # Errors
///
/// Propagates parse and evaluation errors.
pub fn run(input: &str, ctx: &RunContext) -> Result<VarValue, ExpressionError> {
    eval(&parse(input)?, ctx)
}

fn values_equal(a: &VarValue, b: &VarValue) -> bool {
    // Numeric comparison when both sides coerce, string otherwise.
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => a.render() == b.render(),
    }
}

fn compare(a: &VarValue, b: &VarValue) -> Result<std::cmp::Ordering, ExpressionError> {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x
            .partial_cmp(&y)
            .ok_or_else(|| eval_error("NaN is not comparable")),
        _ => Ok(a.render().cmp(&b.render())),
    }
}
