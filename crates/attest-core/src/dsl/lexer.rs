//! Tokenizer for the restricted control DSL.
//!
//! The grammar is a small, expression-free subset of the language
//! profiles are authored in: statements, literal values, and `do ... end`
//! / `{ ... }` block delimiters. Check bodies are not interpreted; the
//! parser only needs enough token structure to find their extents, so
//! unknown punctuation lexes as a generic operator token instead of
//! failing.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Sym(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    /// `=>`, the explicit hash-pair arrow.
    Arrow,
    Dot,
    /// Statement separator: a line break or `;`.
    Newline,
    /// Any other punctuation run (`>=`, `=~`, `!`, ...), kept so check
    /// bodies tokenize without being understood.
    Op(String),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "'{s}'"),
            TokenKind::Str(_) => write!(f, "string"),
            TokenKind::Int(n) => write!(f, "{n}"),
            TokenKind::Float(n) => write!(f, "{n}"),
            TokenKind::Sym(s) => write!(f, ":{s}"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Arrow => write!(f, "'=>'"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Newline => write!(f, "end of statement"),
            TokenKind::Op(s) => write!(f, "'{s}'"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    /// Byte offsets into the source, for raw text capture.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

const OP_CHARS: &str = "+-*/<>=!~%&|^?";

pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut line = 1;

    while pos < bytes.len() {
        let start = pos;
        let c = bytes[pos] as char;

        match c {
            ' ' | '\t' | '\r' => {
                pos += 1;
            }
            '\n' | ';' => {
                pos += 1;
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    line,
                    start,
                    end: pos,
                });
                if c == '\n' {
                    line += 1;
                }
            }
            '#' => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            '\'' | '"' => {
                let (value, consumed) = lex_string(src, pos, c, line)?;
                pos += consumed;
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    line,
                    start,
                    end: pos,
                });
            }
            '(' | ')' | '{' | '}' | '[' | ']' | ',' | '.' => {
                pos += 1;
                let kind = match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    _ => TokenKind::Dot,
                };
                tokens.push(Token {
                    kind,
                    line,
                    start,
                    end: pos,
                });
            }
            ':' => {
                // `:name` is a symbol; a lone colon labels a keyword arg.
                if pos + 1 < bytes.len() && is_ident_start(bytes[pos + 1] as char) {
                    pos += 1;
                    let ident_start = pos;
                    while pos < bytes.len() && is_ident_continue(bytes[pos] as char) {
                        pos += 1;
                    }
                    tokens.push(Token {
                        kind: TokenKind::Sym(src[ident_start..pos].to_string()),
                        line,
                        start,
                        end: pos,
                    });
                } else {
                    pos += 1;
                    tokens.push(Token {
                        kind: TokenKind::Colon,
                        line,
                        start,
                        end: pos,
                    });
                }
            }
            c if c.is_ascii_digit() => {
                let (kind, consumed) = lex_number(src, pos, line)?;
                pos += consumed;
                tokens.push(Token {
                    kind,
                    line,
                    start,
                    end: pos,
                });
            }
            c if is_ident_start(c) => {
                while pos < bytes.len() && is_ident_continue(bytes[pos] as char) {
                    pos += 1;
                }
                // Trailing ? or ! belongs to the method name.
                if pos < bytes.len() && (bytes[pos] == b'?' || bytes[pos] == b'!') {
                    pos += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(src[start..pos].to_string()),
                    line,
                    start,
                    end: pos,
                });
            }
            c if OP_CHARS.contains(c) => {
                while pos < bytes.len() && OP_CHARS.contains(bytes[pos] as char) {
                    pos += 1;
                }
                let run = &src[start..pos];
                let kind = if run == "=>" {
                    TokenKind::Arrow
                } else {
                    TokenKind::Op(run.to_string())
                };
                tokens.push(Token {
                    kind,
                    line,
                    start,
                    end: pos,
                });
            }
            other => {
                return Err(LexError {
                    line,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        start: pos,
        end: pos,
    });
    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '@'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Lex a quoted string starting at `pos`; returns the unescaped value
/// and bytes consumed (including both quotes).
fn lex_string(src: &str, pos: usize, quote: char, line: usize) -> Result<(String, usize), LexError> {
    let bytes = src.as_bytes();
    let mut out = String::new();
    let mut i = pos + 1;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == quote {
            return Ok((out, i + 1 - pos));
        }
        if c == '\\' && i + 1 < bytes.len() {
            let escaped = bytes[i + 1] as char;
            let resolved = match (quote, escaped) {
                (_, '\\') => Some('\\'),
                ('\'', '\'') => Some('\''),
                ('"', '"') => Some('"'),
                ('"', 'n') => Some('\n'),
                ('"', 't') => Some('\t'),
                ('"', '0') => Some('\0'),
                _ => None,
            };
            match resolved {
                Some(r) => {
                    out.push(r);
                    i += 2;
                    continue;
                }
                None => {
                    out.push('\\');
                    i += 1;
                    continue;
                }
            }
        }
        if c == '\n' {
            return Err(LexError {
                line,
                message: "unterminated string literal".to_string(),
            });
        }
        // Multi-byte characters pass through untouched.
        let ch_len = src[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        out.push_str(&src[i..i + ch_len]);
        i += ch_len;
    }

    Err(LexError {
        line,
        message: "unterminated string literal".to_string(),
    })
}

fn lex_number(src: &str, pos: usize, line: usize) -> Result<(TokenKind, usize), LexError> {
    let bytes = src.as_bytes();
    let mut i = pos;
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'_') {
        i += 1;
    }
    let mut is_float = false;
    if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }

    let text: String = src[pos..i].chars().filter(|c| *c != '_').collect();
    let kind = if is_float {
        TokenKind::Float(text.parse().map_err(|_| LexError {
            line,
            message: format!("invalid number '{text}'"),
        })?)
    } else {
        TokenKind::Int(text.parse().map_err(|_| LexError {
            line,
            message: format!("invalid number '{text}'"),
        })?)
    };
    Ok((kind, i - pos))
}
