//! Spigot is a small pipeline-oriented scripting language. Values flow left
//! to right through `|>`, `+>` and `?>`, the current subject is spelled 🍕,
//! and several functions may share a name with `when` conditions deciding
//! which body runs.
//!
//! The crate exposes the classic front-end trio plus the tree-walking
//! evaluator: [`lexer::Lexer`] produces tokens, [`parser::Parser`] builds an
//! [`ast::Program`], and [`interpreter::Interpreter`] evaluates it after a
//! pre-registration pass that hoists named functions.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod object;
pub mod parser;

use error::Result;
use object::Value;

/// Lex and parse a source string into a program.
pub fn parse_source(source: &str) -> Result<ast::Program> {
    let tokens = lexer::Lexer::new(source).lex()?;
    parser::Parser::with_source(tokens, source).parse_program()
}

/// Run a source string end to end with a fresh interpreter and return the
/// value of the last top-level statement.
pub fn run_source(source: &str) -> Result<Value> {
    let program = parse_source(source)?;
    let interpreter = interpreter::Interpreter::new();
    interpreter.preregister(&program);
    Ok(interpreter.eval_program(&program)?)
}
