use miette::Diagnostic;
use quill_il::AssemblyError;
use thiserror::Error;

use crate::token::{Pos, Token};

/// Malformed token.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{message} at {line}:{column}")]
#[diagnostic(code(quill::lex))]
pub struct LexError {
    /// Line of the offending character.
    pub line: u32,
    /// Column of the offending character.
    pub column: u32,
    /// What went wrong.
    pub message: String,
}

impl LexError {
    pub(crate) fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }
}

/// Unexpected token or bad tag nesting.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{message} at {line}:{column}")]
#[diagnostic(code(quill::parse))]
pub struct ParseError {
    /// Line the error is reported at.
    pub line: u32,
    /// Column the error is reported at.
    pub column: u32,
    /// What went wrong.
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }

    /// Position the error is reported at.
    pub fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }
}

/// A structurally valid tree that cannot be lowered.
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    /// `break` or `continue` with no enclosing loop.
    #[error("`{keyword}` outside of a loop at {pos}")]
    #[diagnostic(code(quill::compile::loop_control))]
    LoopControl {
        /// `break` or `continue`.
        keyword: &'static str,
        /// Where the statement is.
        pos: Pos,
    },

    /// Too many arguments for the one-byte arity field.
    #[error("{what} takes at most 127 arguments, got {count} at {pos}")]
    #[diagnostic(code(quill::compile::arity))]
    Arity {
        /// Call, member access or block call.
        what: &'static str,
        /// Arguments supplied.
        count: usize,
        /// Where the call is.
        pos: Pos,
    },

    /// A block definition below the top level of a template.
    #[error("block `{id}` must be defined at the top level, found at {pos}")]
    #[diagnostic(code(quill::compile::nested_block))]
    NestedBlock {
        /// Block name.
        id: String,
        /// Where the definition is.
        pos: Pos,
    },

    /// Label bookkeeping failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Assembly(#[from] AssemblyError),
}

/// Any failure turning source text into instructions.
#[derive(Debug, Error, Diagnostic)]
pub enum SyntaxError {
    /// See [`LexError`].
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lex(#[from] LexError),

    /// See [`ParseError`].
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    /// See [`CompileError`].
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),
}

impl SyntaxError {
    /// Report a failure inside a tag header at the tag keyword, keeping the
    /// original message and position in the text.
    pub(crate) fn in_tag(self, tag: &Token) -> Self {
        match self {
            SyntaxError::Parse(inner) if inner.pos() != tag.pos() => {
                SyntaxError::Parse(ParseError::new(
                    tag.pos(),
                    format!(
                        "in `{}` tag: {} (at {}:{})",
                        tag.value, inner.message, inner.line, inner.column
                    ),
                ))
            }
            other => other,
        }
    }
}
