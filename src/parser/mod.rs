//! Recursive-descent parser producing the tagged AST (`crate::ast`).
//!
//! Mirrors `just-bash::parser`'s split between a standalone lexer module
//! and a parser module that turns the token stream into typed nodes.

mod lexer;
mod parser;

pub use lexer::{lex, Token, TokenKind};
pub use parser::{parse, ParseError, Parser};
