#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod assembler;
mod error;
mod opcode;
pub mod reader;
pub mod writer;

pub use assembler::{Assembler, Label};
pub use error::{AssemblyError, FormatError};
pub use opcode::{
    Address, Code, Condition, Constant, DataType, Encoding, Header, Instruction, JumpKind,
    MAX_ARITY, Opcode, Operator, ReferenceKind, ScopeAction,
};
pub use reader::{Reader, decode};
pub use writer::{Writer, encode};

/// First four bytes of every artifact.
pub const MAGIC: [u8; 4] = *b"QLIL";

/// Format version written by this build. Readers accept every version from 1
/// up to this one.
pub const FORMAT_VERSION: u16 = 1;
