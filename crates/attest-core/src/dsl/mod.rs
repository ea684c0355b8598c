//! The restricted control DSL: tokenizer and statement parser.
//!
//! Control files are code in an expressive scripting language; the core
//! interprets only the registration surface (`control`, `describe`,
//! `title`, `only_if`, `attribute`, `skip_control`, `require`) and
//! carries everything below a check boundary as opaque source text for
//! the runner.

pub mod lexer;
pub mod parser;

pub use parser::{parse, CtrlStmt, DescribeBlock, ParseError, Stmt};
