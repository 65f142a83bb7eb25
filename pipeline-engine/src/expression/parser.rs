// Expression Parser
// Recursive descent parser producing an AST for condition expressions

use crate::expression::lexer::{LexError, Lexer, SpannedToken, Token};

use std::fmt;

/// Abstract Syntax Tree node for expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    String(String),

    /// `variables.foo`, `parameters['key']`, `dependencies.Build.result`
    Reference(Reference),

    /// `eq(a, b)`, `succeeded()`
    FunctionCall { name: String, args: Vec<Expr> },

    /// `not x`, `!x`
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// `a == b`, `a and b`
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `a in ['x', 'y']`, `a not in ['x']`
    Membership {
        needle: Box<Expr>,
        list: Box<Expr>,
        negated: bool,
    },

    /// `['a', 'b']`
    Array(Vec<Expr>),
}

/// Reference to a context value
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub parts: Vec<ReferencePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReferencePart {
    Property(String),
    Index(Box<Expr>),
}

impl Reference {
    pub fn new(name: String) -> Self {
        Self {
            parts: vec![ReferencePart::Property(name)],
        }
    }

    pub fn with_property(mut self, name: String) -> Self {
        self.parts.push(ReferencePart::Property(name));
        self
    }

    pub fn with_index(mut self, index: Expr) -> Self {
        self.parts.push(ReferencePart::Index(Box::new(index)));
        self
    }

    /// First segment, e.g. `variables`
    pub fn root(&self) -> &str {
        match self.parts.first() {
            Some(ReferencePart::Property(name)) => name,
            _ => "",
        }
    }

    /// Second segment when it is a name or a string index
    pub fn member(&self) -> Option<&str> {
        match self.parts.get(1)? {
            ReferencePart::Property(name) => Some(name),
            ReferencePart::Index(expr) => match expr.as_ref() {
                Expr::String(s) => Some(s),
                _ => None,
            },
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            match part {
                ReferencePart::Property(name) if i == 0 => write!(f, "{}", name)?,
                ReferencePart::Property(name) => write!(f, ".{}", name)?,
                ReferencePart::Index(expr) => match expr.as_ref() {
                    Expr::String(s) => write!(f, "['{}']", s)?,
                    Expr::Number(n) => write!(f, "[{}]", n)?,
                    _ => write!(f, "[..]")?,
                },
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        };
        f.write_str(symbol)
    }
}

/// Names of functions that read the status of dependencies
pub const STATUS_FUNCTIONS: &[&str] = &[
    "succeeded",
    "failed",
    "canceled",
    "always",
    "succeededorfailed",
];

impl Expr {
    /// Every reference in the expression, in source order
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Expr::Reference(reference) => {
                out.push(reference);
                for part in &reference.parts {
                    if let ReferencePart::Index(index) = part {
                        index.collect_references(out);
                    }
                }
            }
            Expr::FunctionCall { args, .. } | Expr::Array(args) => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
            Expr::Unary { expr, .. } => expr.collect_references(out),
            Expr::Binary { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Expr::Membership { needle, list, .. } => {
                needle.collect_references(out);
                list.collect_references(out);
            }
            Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => {}
        }
    }

    /// Whether any status function is called anywhere in the expression
    pub fn calls_status_function(&self) -> bool {
        match self {
            Expr::FunctionCall { name, args } => {
                STATUS_FUNCTIONS.contains(&name.to_lowercase().as_str())
                    || args.iter().any(Expr::calls_status_function)
            }
            Expr::Array(items) => items.iter().any(Expr::calls_status_function),
            Expr::Unary { expr, .. } => expr.calls_status_function(),
            Expr::Binary { left, right, .. } => {
                left.calls_status_function() || right.calls_status_function()
            }
            Expr::Membership { needle, list, .. } => {
                needle.calls_status_function() || list.calls_status_function()
            }
            Expr::Reference(_) | Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => {
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseExprError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for ParseExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for ParseExprError {}

impl From<LexError> for ParseExprError {
    fn from(err: LexError) -> Self {
        Self {
            message: err.message,
            position: err.position,
        }
    }
}

pub struct ExprParser {
    tokens: Vec<SpannedToken>,
    position: usize,
}

impl ExprParser {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    pub fn parse_str(input: &str) -> Result<Expr, ParseExprError> {
        let tokens = Lexer::new(input).tokenize()?;
        Self::new(tokens).parse()
    }

    pub fn parse(&mut self) -> Result<Expr, ParseExprError> {
        if self.check(&Token::Eof) {
            return Err(self.error("empty expression"));
        }

        let expr = self.parse_or()?;

        if !self.check(&Token::Eof) {
            return Err(self.error(&format!("unexpected token '{}'", self.peek())));
        }

        Ok(expr)
    }

    // Precedence (lowest to highest):
    // 1. or / ||
    // 2. and / &&
    // 3. not / !
    // 4. == != in, not in
    // 5. < <= > >=
    // 6. primary: literals, references, calls, lists, parentheses

    fn parse_or(&mut self) -> Result<Expr, ParseExprError> {
        let mut left = self.parse_and()?;

        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseExprError> {
        let mut left = self.parse_not()?;

        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseExprError> {
        if self.check(&Token::Not) {
            self.advance();
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }

        self.parse_equality()
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseExprError> {
        let mut left = self.parse_comparison()?;

        loop {
            match self.peek() {
                Token::Eq | Token::Ne => {
                    let op = if self.check(&Token::Eq) {
                        BinaryOp::Eq
                    } else {
                        BinaryOp::Ne
                    };
                    self.advance();
                    let right = self.parse_comparison()?;
                    left = Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                }
                Token::In => {
                    self.advance();
                    let list = self.parse_comparison()?;
                    left = Expr::Membership {
                        needle: Box::new(left),
                        list: Box::new(list),
                        negated: false,
                    };
                }
                Token::Not if self.peek_next() == &Token::In => {
                    self.advance();
                    self.advance();
                    let list = self.parse_comparison()?;
                    left = Expr::Membership {
                        needle: Box::new(left),
                        list: Box::new(list),
                        negated: true,
                    };
                }
                _ => break,
            }
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseExprError> {
        let mut left = self.parse_primary()?;

        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };

            self.advance();
            let right = self.parse_primary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseExprError> {
        match self.peek().clone() {
            Token::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            // Keywords double as function names: and(a, b), or(a, b), in(x, a, b)
            Token::And | Token::Or | Token::In if self.peek_next() == &Token::LParen => {
                let name = self.advance().to_string();
                let args = self.parse_args()?;
                Ok(Expr::FunctionCall { name, args })
            }
            Token::Identifier(name) => {
                self.advance();

                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::FunctionCall { name, args });
                }

                let mut reference = Reference::new(name);
                loop {
                    if self.check(&Token::Dot) {
                        self.advance();
                        let Token::Identifier(prop) = self.advance().clone() else {
                            return Err(self.error_at_previous("expected property name after '.'"));
                        };
                        reference = reference.with_property(prop);
                    } else if self.check(&Token::LBracket) {
                        self.advance();
                        let index = self.parse_or()?;
                        self.expect(&Token::RBracket, "expected ']'")?;
                        reference = reference.with_index(index);
                    } else {
                        break;
                    }
                }

                Ok(Expr::Reference(reference))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "expected ')'")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();

                if !self.check(&Token::RBracket) {
                    items.push(self.parse_or()?);

                    while self.check(&Token::Comma) {
                        self.advance();
                        if self.check(&Token::RBracket) {
                            break; // trailing comma
                        }
                        items.push(self.parse_or()?);
                    }
                }

                self.expect(&Token::RBracket, "expected ']'")?;
                Ok(Expr::Array(items))
            }
            Token::Eof => Err(self.error("unexpected end of expression")),
            token => Err(self.error(&format!("unexpected token '{}'", token))),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseExprError> {
        self.expect(&Token::LParen, "expected '('")?;

        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            args.push(self.parse_or()?);
            while self.check(&Token::Comma) {
                self.advance();
                args.push(self.parse_or()?);
            }
        }

        self.expect(&Token::RParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_next(&self) -> &Token {
        self.tokens
            .get(self.position + 1)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> &Token {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
        self.tokens
            .get(self.position - 1)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token, message: &str) -> Result<(), ParseExprError> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("{}, found '{}'", message, self.peek())))
        }
    }

    fn offset(&self, index: usize) -> usize {
        self.tokens
            .get(index)
            .or_else(|| self.tokens.last())
            .map(|t| t.position)
            .unwrap_or(0)
    }

    fn error(&self, message: &str) -> ParseExprError {
        ParseExprError {
            message: message.to_string(),
            position: self.offset(self.position),
        }
    }

    fn error_at_previous(&self, message: &str) -> ParseExprError {
        ParseExprError {
            message: message.to_string(),
            position: self.offset(self.position.saturating_sub(1)),
        }
    }
}
