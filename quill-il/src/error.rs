use miette::Diagnostic;
use thiserror::Error;

use crate::Label;

/// An artifact could not be decoded. Always means the file is corrupt or was
/// written by an incompatible build.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum FormatError {
    /// The file does not start with the artifact magic.
    #[error("not a quill artifact (magic {found:02x?})")]
    #[diagnostic(code(quill::format::magic))]
    BadMagic {
        /// The four bytes found instead.
        found: [u8; 4],
    },

    /// The artifact was written by a newer format version.
    #[error("artifact format version {found} is newer than the supported version {supported}")]
    #[diagnostic(
        code(quill::format::version),
        help("delete the compiled template cache so it is rebuilt")
    )]
    UnsupportedVersion {
        /// Version stored in the header.
        found: u16,
        /// Newest version this build reads.
        supported: u16,
    },

    /// A record starts with a byte outside the opcode catalogue.
    #[error("unknown opcode 0x{byte:02x} at offset {offset}")]
    #[diagnostic(code(quill::format::opcode))]
    UnknownOpcode {
        /// The offending byte.
        byte: u8,
        /// Byte offset of the record.
        offset: usize,
    },

    /// A flag byte holds a value its opcode does not define.
    #[error("invalid {what} 0x{value:02x} at offset {offset}")]
    #[diagnostic(code(quill::format::enumerant))]
    InvalidEnumerant {
        /// Which enumerant was being decoded.
        what: &'static str,
        /// The offending byte.
        value: u8,
        /// Byte offset of the flag.
        offset: usize,
    },

    /// The file ended in the middle of a header or record.
    #[error("artifact truncated: needed {needed} more bytes at offset {offset}")]
    #[diagnostic(code(quill::format::truncated))]
    Truncated {
        /// Byte offset of the short read.
        offset: usize,
        /// Bytes that were missing.
        needed: usize,
    },

    /// A string operand is not valid UTF-8.
    #[error("invalid UTF-8 string at offset {offset}")]
    #[diagnostic(code(quill::format::utf8))]
    InvalidUtf8 {
        /// Byte offset of the string payload.
        offset: usize,
    },

    /// An address or jump target of 0.
    #[error("zero address at offset {offset}")]
    #[diagnostic(code(quill::format::address))]
    ZeroAddress {
        /// Byte offset of the field.
        offset: usize,
    },

    /// A requested address is not in the artifact.
    #[error("address {address} is outside the artifact")]
    #[diagnostic(code(quill::format::address))]
    AddressOutOfRange {
        /// The missing address.
        address: u32,
    },

    /// Records are not stored in increasing address order.
    #[error("record {found} follows record {previous}")]
    #[diagnostic(code(quill::format::order))]
    OutOfOrder {
        /// Address of the previous record.
        previous: u32,
        /// Address of the misplaced record.
        found: u32,
    },

    /// The instruction list handed to the writer has no document header.
    #[error("instruction list does not start with a document header")]
    #[diagnostic(code(quill::format::document))]
    MissingDocument,

    /// A string operand exceeds the length prefix.
    #[error("string operand of {len} bytes does not fit a length prefix")]
    #[diagnostic(code(quill::format::string))]
    StringTooLong {
        /// Byte length of the string.
        len: usize,
    },
}

/// Symbolic labels could not be resolved to addresses.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum AssemblyError {
    /// A label was placed at two positions.
    #[error("label {0:?} placed twice")]
    #[diagnostic(code(quill::assemble::label))]
    LabelPlacedTwice(Label),

    /// A jump refers to a label that was never placed.
    #[error("label {0:?} is never placed")]
    #[diagnostic(code(quill::assemble::label))]
    UnplacedLabel(Label),

    /// More instructions than addresses.
    #[error("compiled unit exceeds {max} instructions")]
    #[diagnostic(code(quill::assemble::size))]
    TooManyInstructions {
        /// Largest representable address.
        max: u32,
    },
}
