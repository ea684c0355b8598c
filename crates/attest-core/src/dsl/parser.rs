//! Statement parser for the restricted control DSL.
//!
//! Produces a flat statement list per file. Check bodies (`describe`
//! blocks) and `only_if` guards are captured as raw source slices; the
//! core never interprets them.

use super::lexer::{tokenize, Token, TokenKind};
use serde_json::{Map, Number, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl From<super::lexer::LexError> for ParseError {
    fn from(e: super::lexer::LexError) -> Self {
        Self {
            line: e.line,
            message: e.message,
        }
    }
}

/// An anonymous or in-control check block, carried raw.
#[derive(Debug, Clone, PartialEq)]
pub struct DescribeBlock {
    /// Subject expression text, e.g. `file('/etc/hosts')`.
    pub subject: String,
    /// Body text between `do` and the matching `end`.
    pub body: String,
    pub line: usize,
}

/// A top-level statement in a control file.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Control {
        id: Value,
        opts: Vec<(String, Value)>,
        body: Vec<CtrlStmt>,
        line: usize,
        /// Full declaration text, `control` through `end`.
        code: String,
    },
    Describe(DescribeBlock),
    Title {
        value: Value,
        line: usize,
    },
    OnlyIf {
        line: usize,
    },
    Attribute {
        name: String,
        opts: Vec<(String, Value)>,
        line: usize,
    },
    SkipControl {
        id: String,
        line: usize,
    },
    Require {
        path: String,
        line: usize,
    },
}

/// A statement inside a `control` body.
#[derive(Debug, Clone, PartialEq)]
pub enum CtrlStmt {
    Impact { value: Value, line: usize },
    Title { value: Value, line: usize },
    Desc { values: Vec<Value>, line: usize },
    Tag {
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        line: usize,
    },
    Ref {
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        line: usize,
    },
    Describe(DescribeBlock),
    OnlyIf { line: usize },
}

pub fn parse(src: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = tokenize(src)?;
    Parser {
        src,
        tokens,
        pos: 0,
    }
    .program()
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn program(mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_eof() {
                return Ok(statements);
            }
            statements.push(self.statement()?);
        }
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let token = self.peek().clone();
        let TokenKind::Ident(name) = &token.kind else {
            return Err(self.error_at(&token, format!("expected a statement, found {}", token.kind)));
        };

        match name.as_str() {
            "control" | "rule" => self.control_stmt(),
            "describe" => Ok(Stmt::Describe(self.describe_block()?)),
            "title" => {
                self.advance();
                let (mut args, _) = self.args()?;
                let value = self.one_arg(args.drain(..), token.line, "title")?;
                Ok(Stmt::Title {
                    value,
                    line: token.line,
                })
            }
            "only_if" => {
                self.only_if()?;
                Ok(Stmt::OnlyIf { line: token.line })
            }
            "attribute" => {
                self.advance();
                let (args, kwargs) = self.args()?;
                let name = match args.into_iter().next() {
                    Some(Value::String(s)) => s,
                    _ => {
                        return Err(self.error_at(
                            &token,
                            "attribute requires a string name as its first argument".to_string(),
                        ))
                    }
                };
                Ok(Stmt::Attribute {
                    name,
                    opts: kwargs,
                    line: token.line,
                })
            }
            "skip_control" | "skip_rule" => {
                self.advance();
                let (mut args, _) = self.args()?;
                let id = match self.one_arg(args.drain(..), token.line, name)? {
                    Value::String(s) => s,
                    other => value_to_display(&other),
                };
                Ok(Stmt::SkipControl {
                    id,
                    line: token.line,
                })
            }
            "require" | "require_relative" => {
                self.advance();
                let (mut args, _) = self.args()?;
                let path = match self.one_arg(args.drain(..), token.line, name)? {
                    Value::String(s) => s,
                    other => value_to_display(&other),
                };
                Ok(Stmt::Require {
                    path,
                    line: token.line,
                })
            }
            other => Err(self.error_at(
                &token,
                format!("unknown statement '{other}' at file scope"),
            )),
        }
    }

    fn control_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.peek().clone();
        self.advance();
        let (args, opts) = self.args()?;
        let id = args.into_iter().next().ok_or_else(|| {
            self.error_at(&start, "control requires an identifier".to_string())
        })?;

        self.expect_ident("do")?;

        let mut body = Vec::new();
        let end;
        loop {
            self.skip_newlines();
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Ident(kw) if kw == "end" => {
                    self.advance();
                    end = token;
                    break;
                }
                TokenKind::Eof => {
                    return Err(self.error_at(
                        &start,
                        "control block is missing its 'end'".to_string(),
                    ))
                }
                _ => body.push(self.control_body_stmt()?),
            }
        }

        Ok(Stmt::Control {
            id,
            opts,
            body,
            line: start.line,
            code: self.src[start.start..end.end].to_string(),
        })
    }

    fn control_body_stmt(&mut self) -> Result<CtrlStmt, ParseError> {
        let token = self.peek().clone();
        let TokenKind::Ident(name) = &token.kind else {
            return Err(self.error_at(
                &token,
                format!("expected a control statement, found {}", token.kind),
            ));
        };

        match name.as_str() {
            "impact" => {
                self.advance();
                let (mut args, _) = self.args()?;
                let value = self.one_arg(args.drain(..), token.line, "impact")?;
                Ok(CtrlStmt::Impact {
                    value,
                    line: token.line,
                })
            }
            "title" => {
                self.advance();
                let (mut args, _) = self.args()?;
                let value = self.one_arg(args.drain(..), token.line, "title")?;
                Ok(CtrlStmt::Title {
                    value,
                    line: token.line,
                })
            }
            "desc" => {
                self.advance();
                let (args, _) = self.args()?;
                Ok(CtrlStmt::Desc {
                    values: args,
                    line: token.line,
                })
            }
            "tag" => {
                self.advance();
                let (args, kwargs) = self.args()?;
                Ok(CtrlStmt::Tag {
                    args,
                    kwargs,
                    line: token.line,
                })
            }
            "ref" => {
                self.advance();
                let (args, kwargs) = self.args()?;
                Ok(CtrlStmt::Ref {
                    args,
                    kwargs,
                    line: token.line,
                })
            }
            "describe" => Ok(CtrlStmt::Describe(self.describe_block()?)),
            "only_if" => {
                self.only_if()?;
                Ok(CtrlStmt::OnlyIf { line: token.line })
            }
            other => Err(self.error_at(
                &token,
                format!("unknown statement '{other}' inside a control"),
            )),
        }
    }

    /// `describe <subject> do <body> end`, subject and body captured raw.
    fn describe_block(&mut self) -> Result<DescribeBlock, ParseError> {
        let start = self.peek().clone();
        self.advance();

        // Subject: everything up to the block-opening `do` at depth zero.
        let mut depth = 0usize;
        let subject_start = self.peek().start;
        let mut subject_end = subject_start;
        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Ident(kw) if kw == "do" && depth == 0 => {
                    self.advance();
                    break;
                }
                TokenKind::LParen | TokenKind::LBrace | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBrace | TokenKind::RBracket => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Newline | TokenKind::Eof => {
                    return Err(self.error_at(
                        &start,
                        "describe is missing its 'do' block".to_string(),
                    ));
                }
                _ => {}
            }
            subject_end = token.end;
            self.advance();
        }
        let subject = self.src[subject_start..subject_end].trim().to_string();
        if subject.is_empty() {
            return Err(self.error_at(&start, "describe requires a subject".to_string()));
        }

        // Body: raw text to the matching `end`.
        let body_start = self.peek().start;
        let mut block_depth = 1usize;
        let body_end;
        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Ident(kw) if kw == "do" => block_depth += 1,
                TokenKind::Ident(kw) if kw == "end" => {
                    block_depth -= 1;
                    if block_depth == 0 {
                        body_end = token.start;
                        self.advance();
                        break;
                    }
                }
                TokenKind::Eof => {
                    return Err(self.error_at(
                        &start,
                        "describe block is missing its 'end'".to_string(),
                    ));
                }
                _ => {}
            }
            self.advance();
        }

        Ok(DescribeBlock {
            subject,
            body: self.src[body_start..body_end].trim().to_string(),
            line: start.line,
        })
    }

    /// `only_if`, with an optional reason argument and an optional
    /// `do ... end` or `{ ... }` guard body. The guard is runner
    /// territory; only the sticky flag matters here.
    fn only_if(&mut self) -> Result<(), ParseError> {
        let start = self.peek().clone();
        self.advance();
        let _ = self.args()?;

        match &self.peek().kind {
            TokenKind::LBrace => {
                let mut depth = 0usize;
                loop {
                    let token = self.peek().clone();
                    match &token.kind {
                        TokenKind::LBrace => depth += 1,
                        TokenKind::RBrace => {
                            depth -= 1;
                            if depth == 0 {
                                self.advance();
                                return Ok(());
                            }
                        }
                        TokenKind::Eof => {
                            return Err(self.error_at(
                                &start,
                                "only_if block is missing its '}'".to_string(),
                            ))
                        }
                        _ => {}
                    }
                    self.advance();
                }
            }
            TokenKind::Ident(kw) if kw == "do" => {
                let mut depth = 0usize;
                loop {
                    let token = self.peek().clone();
                    match &token.kind {
                        TokenKind::Ident(kw) if kw == "do" => depth += 1,
                        TokenKind::Ident(kw) if kw == "end" => {
                            depth -= 1;
                            if depth == 0 {
                                self.advance();
                                return Ok(());
                            }
                        }
                        TokenKind::Eof => {
                            return Err(self.error_at(
                                &start,
                                "only_if block is missing its 'end'".to_string(),
                            ))
                        }
                        _ => {}
                    }
                    self.advance();
                }
            }
            _ => Ok(()),
        }
    }

    /// Argument list: positional values and keyword pairs, optionally
    /// parenthesized. The bare form ends at a statement boundary or a
    /// block opener.
    fn args(&mut self) -> Result<(Vec<Value>, Vec<(String, Value)>), ParseError> {
        let mut positional = Vec::new();
        let mut keyword: Vec<(String, Value)> = Vec::new();

        let parenthesized = matches!(self.peek().kind, TokenKind::LParen);
        if parenthesized {
            self.advance();
        }

        loop {
            if parenthesized {
                self.skip_newlines();
                if matches!(self.peek().kind, TokenKind::RParen) {
                    self.advance();
                    break;
                }
            } else if matches!(
                self.peek().kind,
                TokenKind::Newline | TokenKind::Eof | TokenKind::LBrace
            ) || self.peek_is_ident("do")
            {
                break;
            }

            if let Some(name) = self.try_kwarg_label()? {
                let value = self.value()?;
                keyword.push((name, value));
            } else {
                positional.push(self.value()?);
            }

            if matches!(self.peek().kind, TokenKind::Comma) {
                self.advance();
                continue;
            }
            if parenthesized {
                self.skip_newlines();
                let token = self.peek().clone();
                if !matches!(token.kind, TokenKind::RParen) {
                    return Err(self.error_at(
                        &token,
                        format!("expected ',' or ')' in argument list, found {}", token.kind),
                    ));
                }
            } else {
                break;
            }
        }

        Ok((positional, keyword))
    }

    /// Consume a keyword-argument label if one is next: `name:`,
    /// `:name =>`, or `'name' =>`.
    fn try_kwarg_label(&mut self) -> Result<Option<String>, ParseError> {
        let next = self.tokens.get(self.pos + 1).map(|t| t.kind.clone());
        let name = match (&self.peek().kind, next) {
            (TokenKind::Ident(name), Some(TokenKind::Colon)) => Some(name.clone()),
            (TokenKind::Sym(name), Some(TokenKind::Arrow)) => Some(name.clone()),
            (TokenKind::Str(name), Some(TokenKind::Arrow)) => Some(name.clone()),
            _ => None,
        };
        match name {
            Some(name) => {
                self.advance();
                self.advance();
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    /// A literal value: string, number, symbol, bool, nil, array, hash.
    fn value(&mut self) -> Result<Value, ParseError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Str(s) => {
                self.advance();
                Ok(Value::String(s.clone()))
            }
            TokenKind::Int(n) => {
                self.advance();
                Ok(Value::Number((*n).into()))
            }
            TokenKind::Float(f) => {
                self.advance();
                Number::from_f64(*f)
                    .map(Value::Number)
                    .ok_or_else(|| self.error_at(&token, format!("invalid number {f}")))
            }
            TokenKind::Sym(s) => {
                self.advance();
                Ok(Value::String(s.clone()))
            }
            TokenKind::Op(op) if op == "-" => {
                self.advance();
                let inner = self.value()?;
                match inner {
                    Value::Number(n) if n.is_i64() => {
                        Ok(Value::Number((-n.as_i64().unwrap()).into()))
                    }
                    Value::Number(n) => Number::from_f64(-n.as_f64().unwrap_or(0.0))
                        .map(Value::Number)
                        .ok_or_else(|| self.error_at(&token, "invalid number".to_string())),
                    _ => Err(self.error_at(&token, "'-' must precede a number".to_string())),
                }
            }
            TokenKind::Ident(word) if word == "true" => {
                self.advance();
                Ok(Value::Bool(true))
            }
            TokenKind::Ident(word) if word == "false" => {
                self.advance();
                Ok(Value::Bool(false))
            }
            TokenKind::Ident(word) if word == "nil" => {
                self.advance();
                Ok(Value::Null)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    self.skip_newlines();
                    if matches!(self.peek().kind, TokenKind::RBracket) {
                        self.advance();
                        break;
                    }
                    items.push(self.value()?);
                    self.skip_newlines();
                    if matches!(self.peek().kind, TokenKind::Comma) {
                        self.advance();
                    }
                }
                Ok(Value::Array(items))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut map = Map::new();
                loop {
                    self.skip_newlines();
                    if matches!(self.peek().kind, TokenKind::RBrace) {
                        self.advance();
                        break;
                    }
                    let key = match self.try_kwarg_label()? {
                        Some(key) => key,
                        None => {
                            let token = self.peek().clone();
                            return Err(self.error_at(
                                &token,
                                format!("expected a hash key, found {}", token.kind),
                            ));
                        }
                    };
                    let value = self.value()?;
                    map.insert(key, value);
                    self.skip_newlines();
                    if matches!(self.peek().kind, TokenKind::Comma) {
                        self.advance();
                    }
                }
                Ok(Value::Object(map))
            }
            other => Err(self.error_at(
                &token,
                format!("expected a literal value, found {other}"),
            )),
        }
    }

    fn one_arg(
        &self,
        mut args: impl Iterator<Item = Value>,
        line: usize,
        statement: &str,
    ) -> Result<Value, ParseError> {
        args.next().ok_or_else(|| ParseError {
            line,
            message: format!("{statement} requires an argument"),
        })
    }

    fn expect_ident(&mut self, word: &str) -> Result<(), ParseError> {
        let token = self.peek().clone();
        if self.peek_is_ident(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_at(&token, format!("expected '{word}', found {}", token.kind)))
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_is_ident(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(w) if w == word)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline) {
            self.advance();
        }
    }

    fn error_at(&self, token: &Token, message: String) -> ParseError {
        ParseError {
            line: token.line,
            message,
        }
    }
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
