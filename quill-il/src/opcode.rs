//! The opcode catalogue.
//!
//! Every instruction the VM understands is a variant of [`Opcode`]. The type
//! parameter is the jump-target representation: the compiler builds
//! `Opcode<Label>` and the assembler resolves those into `Opcode<Address>`,
//! which is what gets written to and read back from an artifact.

use core::fmt;
use core::num::NonZeroU32;

/// Declares a `#[repr(u8)]` enum that is stored as a single byte in an
/// artifact, with a checked conversion back from the byte.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $byte:literal => $mnemonic:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $byte, )+
        }

        impl $name {
            /// The byte this value is stored as.
            pub const fn as_byte(self) -> u8 {
                self as u8
            }

            /// Decode a byte, returning `None` for values outside the catalogue.
            pub const fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $byte => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Short lowercase name used by the disassembler.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Self::$variant => $mnemonic, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.mnemonic())
            }
        }
    };
}

wire_enum! {
    /// The opcode byte of an instruction record.
    pub enum Code {
        /// Artifact header; never written as a record.
        Document = 0x01 => "document",
        /// Marker, does nothing.
        Nop = 0x02 => "nop",
        /// Push a constant.
        LoadConst = 0x04 => "ldc",
        /// Push a variable.
        LoadVariable = 0x05 => "ldv",
        /// Pop into a variable.
        SetVariable = 0x06 => "stv",
        /// Call a function or method.
        Call = 0x07 => "call",
        /// Pop and print.
        Print = 0x08 => "print",
        /// Arithmetic, comparison and logic.
        Operation = 0x09 => "op",
        /// Branches and exit.
        Jump = 0x0A => "jmp",
        /// Member access and indexing.
        LoadMember = 0x0B => "ldm",
        /// Push or pop a variable scope.
        Scope = 0x0C => "scope",
        /// Declare a named block.
        Block = 0x0D => "block",
        /// Invoke a named block.
        BlockCall = 0x0E => "blkcall",
        /// Include, layout or require another template.
        Reference = 0x10 => "ref",
        /// Wrap a value in an iterator.
        CastToIterator = 0x11 => "iter",
    }
}

wire_enum! {
    /// Type tag of a [`Constant`], stored in the flag byte of `LoadConst`.
    pub enum DataType {
        /// `null`
        Null = 0 => "null",
        /// Length-prefixed UTF-8.
        String = 1 => "string",
        /// 32-bit signed integer.
        Integer = 2 => "int",
        /// 64-bit signed integer.
        Long = 3 => "long",
        /// 64-bit IEEE754.
        Float = 4 => "float",
        /// `true`, no operand.
        True = 5 => "true",
        /// `false`, no operand.
        False = 6 => "false",
    }
}

wire_enum! {
    /// Operator of an `Operation` instruction.
    pub enum Operator {
        /// `a + b`
        Add = 1 => "add",
        /// `a - b`
        Sub = 2 => "sub",
        /// `a * b`
        Mul = 3 => "mul",
        /// `a / b`
        Div = 4 => "div",
        /// `a % b`
        Mod = 5 => "mod",
        /// `-a`
        Neg = 6 => "neg",
        /// `+a`
        Pos = 7 => "pos",
        /// `a == b`
        Eq = 8 => "eq",
        /// `a != b`
        Ne = 9 => "ne",
        /// `a > b`
        Gt = 10 => "gt",
        /// `a >= b`
        Ge = 11 => "ge",
        /// `a < b`
        Lt = 12 => "lt",
        /// `a <= b`
        Le = 13 => "le",
        /// Non short-circuiting logical and.
        And = 14 => "and",
        /// Non short-circuiting logical or.
        Or = 15 => "or",
    }
}

impl Operator {
    /// Whether this operator pops one operand instead of two.
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Pos)
    }
}

wire_enum! {
    /// Jump kind, stored in the flag byte of `Jump`.
    pub enum JumpKind {
        /// Unconditional.
        Always = 0 => "always",
        /// Pop, jump when truthy.
        OnTrue = 1 => "true",
        /// Pop, jump when falsy.
        OnFalse = 2 => "false",
        /// Stop the current frame.
        Exit = 3 => "exit",
    }
}

wire_enum! {
    /// Direction of a `Scope` instruction.
    pub enum ScopeAction {
        /// Enter a scope seeded with a copy of the current bindings.
        Push = 0 => "push",
        /// Discard the innermost scope.
        Pop = 1 => "pop",
    }
}

wire_enum! {
    /// What a `Reference` instruction does with the template it loads.
    pub enum ReferenceKind {
        /// Run the other template inline, then continue.
        Include = 0 => "include",
        /// Hand the rest of this render to the other template.
        Layout = 1 => "layout",
        /// Import the other template's blocks without running it.
        Require = 2 => "require",
    }
}

wire_enum! {
    /// Text encoding recorded in the artifact header.
    pub enum Encoding {
        /// UTF-8.
        Utf8 = 0 => "utf-8",
        /// 7-bit ASCII.
        Ascii = 1 => "ascii",
    }
}

/// Largest argument count a `Call` can encode; the flag byte's high bit
/// marks method calls.
pub const MAX_ARITY: u8 = 0x7f;

/// Address of an instruction inside one artifact.
///
/// Addresses start at 1 and increase by one per instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(NonZeroU32);

impl Address {
    /// The address of the first instruction (the document header).
    pub const FIRST: Address = Address(NonZeroU32::MIN);

    /// Wrap a raw address. Returns `None` for 0.
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// The raw value.
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// The address immediately after this one.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("@{}", self.0))
    }
}

/// A constant operand of `LoadConst`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// An integer that fits 32 bits.
    Integer(i32),
    /// An integer that needs 64 bits.
    Long(i64),
    /// A double.
    Float(f64),
    /// A string.
    String(String),
}

impl Constant {
    /// Pick the narrowest integer representation for `value`.
    pub fn integer(value: i64) -> Self {
        match i32::try_from(value) {
            Ok(small) => Constant::Integer(small),
            Err(_) => Constant::Long(value),
        }
    }

    /// The type tag this constant is stored with.
    pub fn data_type(&self) -> DataType {
        match self {
            Constant::Null => DataType::Null,
            Constant::Bool(true) => DataType::True,
            Constant::Bool(false) => DataType::False,
            Constant::Integer(_) => DataType::Integer,
            Constant::Long(_) => DataType::Long,
            Constant::Float(_) => DataType::Float,
            Constant::String(_) => DataType::String,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Integer(n) => write!(f, "{n}"),
            Constant::Long(n) => write!(f, "{n}L"),
            Constant::Float(n) => write!(f, "{n:?}"),
            Constant::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// A conditional or unconditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Always taken.
    Always,
    /// Taken when the popped value is truthy.
    IfTrue,
    /// Taken when the popped value is falsy.
    IfFalse,
}

impl Condition {
    /// The wire kind of a jump with this condition.
    pub const fn kind(self) -> JumpKind {
        match self {
            Condition::Always => JumpKind::Always,
            Condition::IfTrue => JumpKind::OnTrue,
            Condition::IfFalse => JumpKind::OnFalse,
        }
    }
}

/// One instruction, generic over how jump targets are represented.
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode<T = Address> {
    /// Artifact header. Always the first instruction of a compiled unit.
    Document {
        /// First instruction after the block declarations.
        header_end: T,
        /// Source modification time, milliseconds since the Unix epoch.
        mtime: i64,
        /// Canonical source path the artifact was compiled from.
        source: String,
    },
    /// Does nothing; used as a jump target.
    Nop,
    /// Push a constant.
    LoadConst(Constant),
    /// Push the value bound to a name, or null.
    LoadVariable(String),
    /// Pop a value and bind it in the current scope.
    SetVariable(String),
    /// Pop a callee, then a receiver for method calls, then `arity`
    /// arguments. A string callee names a registered function.
    Call {
        /// Number of arguments, at most [`MAX_ARITY`].
        arity: u8,
        /// A receiver sits between the arguments and the callee.
        receiver: bool,
    },
    /// Pop a value and append it to the output.
    Print {
        /// HTML-escape the rendered value.
        escape: bool,
    },
    /// Pop one or two operands and push the result.
    Operation(Operator),
    /// Branch to `target`.
    Jump {
        /// When the jump is taken.
        condition: Condition,
        /// Where to go.
        target: T,
    },
    /// End the current frame.
    Exit,
    /// Pop a receiver, then `arity` index arguments, and push the member.
    LoadMember {
        /// Number of index arguments.
        arity: u8,
    },
    /// Push or pop a variable scope.
    Scope(ScopeAction),
    /// Start of a named block body. The body runs until `Exit`.
    Block {
        /// Block name.
        id: String,
    },
    /// Invoke a named block, or the layout child's body for `"body"`.
    BlockCall {
        /// Block name.
        id: String,
        /// Number of parameters bound in the preceding scope.
        arity: u8,
    },
    /// Load another template.
    Reference {
        /// Include, layout or require.
        kind: ReferenceKind,
        /// Canonical template path.
        src: String,
    },
    /// Pop a value and push an iterator over it.
    CastToIterator,
}

impl<T> Opcode<T> {
    /// The opcode byte of this instruction.
    pub fn code(&self) -> Code {
        match self {
            Opcode::Document { .. } => Code::Document,
            Opcode::Nop => Code::Nop,
            Opcode::LoadConst(_) => Code::LoadConst,
            Opcode::LoadVariable(_) => Code::LoadVariable,
            Opcode::SetVariable(_) => Code::SetVariable,
            Opcode::Call { .. } => Code::Call,
            Opcode::Print { .. } => Code::Print,
            Opcode::Operation(_) => Code::Operation,
            Opcode::Jump { .. } | Opcode::Exit => Code::Jump,
            Opcode::LoadMember { .. } => Code::LoadMember,
            Opcode::Scope(_) => Code::Scope,
            Opcode::Block { .. } => Code::Block,
            Opcode::BlockCall { .. } => Code::BlockCall,
            Opcode::Reference { .. } => Code::Reference,
            Opcode::CastToIterator => Code::CastToIterator,
        }
    }

    /// The jump target carried by this instruction, if any.
    pub fn target(&self) -> Option<&T> {
        match self {
            Opcode::Document { header_end, .. } => Some(header_end),
            Opcode::Jump { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Rewrite the jump target, if any, through `f`.
    pub fn try_map_target<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Opcode<U>, E> {
        Ok(match self {
            Opcode::Document {
                header_end,
                mtime,
                source,
            } => Opcode::Document {
                header_end: f(header_end)?,
                mtime,
                source,
            },
            Opcode::Jump { condition, target } => Opcode::Jump {
                condition,
                target: f(target)?,
            },
            Opcode::Nop => Opcode::Nop,
            Opcode::LoadConst(c) => Opcode::LoadConst(c),
            Opcode::LoadVariable(name) => Opcode::LoadVariable(name),
            Opcode::SetVariable(name) => Opcode::SetVariable(name),
            Opcode::Call { arity, receiver } => Opcode::Call { arity, receiver },
            Opcode::Print { escape } => Opcode::Print { escape },
            Opcode::Operation(op) => Opcode::Operation(op),
            Opcode::Exit => Opcode::Exit,
            Opcode::LoadMember { arity } => Opcode::LoadMember { arity },
            Opcode::Scope(action) => Opcode::Scope(action),
            Opcode::Block { id } => Opcode::Block { id },
            Opcode::BlockCall { id, arity } => Opcode::BlockCall { id, arity },
            Opcode::Reference { kind, src } => Opcode::Reference { kind, src },
            Opcode::CastToIterator => Opcode::CastToIterator,
        })
    }
}

impl<T: fmt::Display> fmt::Display for Opcode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        match self {
            Opcode::Document {
                header_end,
                mtime,
                source,
            } => write!(f, "{code} {source:?} mtime={mtime} body={header_end}"),
            Opcode::LoadConst(c) => write!(f, "{code} {c}"),
            Opcode::LoadVariable(name) | Opcode::SetVariable(name) => write!(f, "{code} {name}"),
            Opcode::Call { arity, receiver } => {
                write!(f, "{code}{} {arity}", if *receiver { ".method" } else { "" })
            }
            Opcode::LoadMember { arity } => write!(f, "{code} {arity}"),
            Opcode::Print { escape } => {
                write!(f, "{code}{}", if *escape { " escape" } else { "" })
            }
            Opcode::Operation(op) => write!(f, "{code} {op}"),
            Opcode::Jump { condition, target } => write!(f, "{code}.{} {target}", condition.kind()),
            Opcode::Exit => write!(f, "{code}.{}", JumpKind::Exit),
            Opcode::Scope(action) => write!(f, "{code} {action}"),
            Opcode::Block { id } => write!(f, "{code} {id}"),
            Opcode::BlockCall { id, arity } => write!(f, "{code} {id}/{arity}"),
            Opcode::Reference { kind, src } => write!(f, "{code}.{kind} {src:?}"),
            Opcode::Nop | Opcode::CastToIterator => write!(f, "{code}"),
        }
    }
}

/// A resolved instruction: an opcode at a final address.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Final address, unique within the artifact.
    pub address: Address,
    /// 1-based source line the instruction was compiled from.
    pub line: u32,
    /// What the instruction does.
    pub op: Opcode,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6} {:>4}  {}", self.address, self.line, self.op)
    }
}

/// Decoded artifact header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version the artifact was written with.
    pub version: u16,
    /// Text encoding of string operands.
    pub encoding: Encoding,
    /// First executable instruction.
    pub header_end: Address,
    /// Source modification time, milliseconds since the Unix epoch.
    pub mtime: i64,
    /// Canonical source path.
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_bytes_are_stable() {
        assert_eq!(Code::Reference.as_byte(), 0x10);
        assert_eq!(Code::from_byte(0x03), None);
        assert_eq!(Code::from_byte(0x11), Some(Code::CastToIterator));
        assert_eq!(DataType::from_byte(5), Some(DataType::True));
        assert_eq!(Operator::from_byte(15), Some(Operator::Or));
        assert_eq!(Operator::from_byte(0), None);
    }

    #[test]
    fn integers_pick_narrowest_type() {
        assert_eq!(Constant::integer(7), Constant::Integer(7));
        assert_eq!(
            Constant::integer(i64::from(i32::MAX) + 1),
            Constant::Long(i64::from(i32::MAX) + 1)
        );
        assert_eq!(Constant::integer(-3).data_type(), DataType::Integer);
    }

    #[test]
    fn address_zero_is_rejected() {
        assert_eq!(Address::new(0), None);
        assert_eq!(Address::FIRST.get(), 1);
        assert_eq!(Address::FIRST.next().map(Address::get), Some(2));
    }

    #[test]
    fn disassembly() {
        let ins = Instruction {
            address: Address::new(12).unwrap(),
            line: 3,
            op: Opcode::Jump {
                condition: Condition::IfFalse,
                target: Address::new(20).unwrap(),
            },
        };
        assert_eq!(ins.to_string(), "   @12    3  jmp.false @20");
    }
}
