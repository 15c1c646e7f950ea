//! Front end: source text → tokens → untyped syntax tree.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

use std::sync::Arc;

use crate::diagnostic::Diagnostic;
use ast::SourceUnit;
use lexer::Lexer;
use parser::Parser;

/// Lex and parse one source fragment.
pub fn parse_unit(source: &str, file: Option<Arc<str>>) -> Result<SourceUnit, Diagnostic> {
    let mut lexer = Lexer::new(source).with_file(file.clone());
    let tokens = lexer.tokenize()?;
    let mut parser = Parser::new(tokens).with_file(file);
    parser.parse()
}
