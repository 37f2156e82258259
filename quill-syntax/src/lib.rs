#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod ast;
mod compile;
mod error;
pub mod lexer;
pub mod parser;
pub mod path;
mod token;

pub use compile::{Emitter, LoopTargets};
pub use error::{CompileError, LexError, ParseError, SyntaxError};
pub use lexer::Lexer;
pub use parser::{Breakpoint, Parser, TagHandler, TagTable, parse};
pub use token::{Pos, Token, TokenKind};

use quill_il::Instruction;

/// Lex, parse and compile the template at canonical path `file`.
/// `mtime` is stored in the document header.
pub fn compile(source: &str, file: &str, mtime: i64) -> Result<Vec<Instruction>, SyntaxError> {
    let root = parse(source, file)?;
    Ok(root.compile(mtime)?)
}
