//! Big-endian artifact writer.

use crate::{
    Code, Constant, Encoding, FORMAT_VERSION, FormatError, Header, Instruction, JumpKind, MAGIC,
    MAX_ARITY, Opcode,
};

/// Serializes a header and instruction records into a byte buffer.
#[derive(Debug, Default)]
pub struct Writer {
    out: Vec<u8>,
}

impl Writer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the writer and return the bytes.
    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    fn write_u8(&mut self, val: u8) {
        self.out.push(val);
    }

    fn write_u16(&mut self, val: u16) {
        self.out.extend_from_slice(&val.to_be_bytes());
    }

    fn write_u32(&mut self, val: u32) {
        self.out.extend_from_slice(&val.to_be_bytes());
    }

    fn write_i32(&mut self, val: i32) {
        self.out.extend_from_slice(&val.to_be_bytes());
    }

    fn write_i64(&mut self, val: i64) {
        self.out.extend_from_slice(&val.to_be_bytes());
    }

    fn write_f64(&mut self, val: f64) {
        self.out.extend_from_slice(&val.to_bits().to_be_bytes());
    }

    /// Write a length-prefixed UTF-8 string.
    fn write_str(&mut self, val: &str) -> Result<(), FormatError> {
        let len = u32::try_from(val.len())
            .map_err(|_| FormatError::StringTooLong { len: val.len() })?;
        self.write_u32(len);
        self.out.extend_from_slice(val.as_bytes());
        Ok(())
    }

    /// Write the artifact header.
    pub fn write_header(&mut self, header: &Header) -> Result<(), FormatError> {
        self.out.extend_from_slice(&MAGIC);
        self.write_u16(header.version);
        self.write_u8(header.encoding.as_byte());
        self.write_u32(header.header_end.get());
        self.write_i64(header.mtime);
        self.write_str(&header.source)
    }

    /// Write one instruction record. `Document` instructions cannot be
    /// written as records; use [`Writer::write_header`].
    pub fn write_instruction(&mut self, ins: &Instruction) -> Result<(), FormatError> {
        let (flag, code) = match &ins.op {
            Opcode::Document { .. } => return Err(FormatError::MissingDocument),
            Opcode::LoadConst(c) => (c.data_type().as_byte(), Code::LoadConst),
            Opcode::Call { arity, receiver } => (
                (*arity).min(MAX_ARITY) | if *receiver { 0x80 } else { 0 },
                Code::Call,
            ),
            Opcode::LoadMember { arity } => (*arity, Code::LoadMember),
            Opcode::BlockCall { arity, .. } => (*arity, Code::BlockCall),
            Opcode::Print { escape } => (u8::from(*escape), Code::Print),
            Opcode::Operation(op) => (op.as_byte(), Code::Operation),
            Opcode::Jump { condition, .. } => (condition.kind().as_byte(), Code::Jump),
            Opcode::Exit => (JumpKind::Exit.as_byte(), Code::Jump),
            Opcode::Scope(action) => (action.as_byte(), Code::Scope),
            Opcode::Reference { kind, .. } => (kind.as_byte(), Code::Reference),
            other => (0, other.code()),
        };

        self.write_u32(ins.address.get());
        self.write_u8(code.as_byte());
        self.write_u16(u16::try_from(ins.line).unwrap_or(u16::MAX));
        self.write_u8(flag);

        match &ins.op {
            Opcode::LoadConst(c) => match c {
                Constant::Null | Constant::Bool(_) => {}
                Constant::Integer(n) => self.write_i32(*n),
                Constant::Long(n) => self.write_i64(*n),
                Constant::Float(n) => self.write_f64(*n),
                Constant::String(s) => self.write_str(s)?,
            },
            Opcode::LoadVariable(name) | Opcode::SetVariable(name) => self.write_str(name)?,
            Opcode::Jump { target, .. } => self.write_u32(target.get()),
            Opcode::Block { id } | Opcode::BlockCall { id, .. } => self.write_str(id)?,
            Opcode::Reference { src, .. } => self.write_str(src)?,
            _ => {}
        }
        Ok(())
    }
}

/// Serialize a compiled unit. The first instruction must be the `Document`
/// header; every other instruction becomes one record.
pub fn encode(code: &[Instruction]) -> Result<Vec<u8>, FormatError> {
    let Some((
        Instruction {
            op:
                Opcode::Document {
                    header_end,
                    mtime,
                    source,
                },
            ..
        },
        records,
    )) = code.split_first()
    else {
        return Err(FormatError::MissingDocument);
    };

    let mut writer = Writer::new();
    writer.write_header(&Header {
        version: FORMAT_VERSION,
        encoding: Encoding::Utf8,
        header_end: *header_end,
        mtime: *mtime,
        source: source.clone(),
    })?;
    for ins in records {
        writer.write_instruction(ins)?;
    }
    Ok(writer.finish())
}
