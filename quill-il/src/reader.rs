//! Big-endian artifact reader.
//!
//! The reader never looks ahead: the header is decoded once, and every call
//! to [`Reader::read_instruction`] consumes exactly one record.

use crate::{
    Address, Code, Condition, Constant, DataType, Encoding, FORMAT_VERSION, FormatError, Header,
    Instruction, JumpKind, MAGIC, MAX_ARITY, Opcode, Operator, ReferenceKind, ScopeAction,
};

/// A cursor over artifact bytes.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Resume reading at byte offset `pos`.
    pub fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(FormatError::Truncated {
                offset: self.pos,
                needed: n - (self.bytes.len() - self.pos.min(self.bytes.len())),
            });
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, FormatError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, FormatError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn read_i32(&mut self) -> Result<i32, FormatError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, FormatError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, FormatError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.take_array()?)))
    }

    fn read_address(&mut self) -> Result<Address, FormatError> {
        let offset = self.pos;
        Address::new(self.read_u32()?).ok_or(FormatError::ZeroAddress { offset })
    }

    fn read_string(&mut self) -> Result<String, FormatError> {
        let len = self.read_u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        core::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| FormatError::InvalidUtf8 { offset })
    }

    /// Decode the artifact header. Must be called at offset 0.
    pub fn read_header(&mut self) -> Result<Header, FormatError> {
        let magic: [u8; 4] = self.take_array()?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic { found: magic });
        }
        let version = self.read_u16()?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }
        let offset = self.pos;
        let byte = self.read_u8()?;
        let encoding = Encoding::from_byte(byte).ok_or(FormatError::InvalidEnumerant {
            what: "text encoding",
            value: byte,
            offset,
        })?;
        let header_end = self.read_address()?;
        let mtime = self.read_i64()?;
        let source = self.read_string()?;
        Ok(Header {
            version,
            encoding,
            header_end,
            mtime,
            source,
        })
    }

    /// Decode the next record, or `None` at a clean end of input.
    pub fn read_instruction(&mut self) -> Result<Option<Instruction>, FormatError> {
        if self.is_at_end() {
            return Ok(None);
        }
        let record = self.pos;
        let address = self.read_address()?;
        let byte = self.read_u8()?;
        let code = Code::from_byte(byte).ok_or(FormatError::UnknownOpcode {
            byte,
            offset: record,
        })?;
        let line = u32::from(self.read_u16()?);
        let flag_offset = self.pos;
        let flag = self.read_u8()?;
        let invalid = |what| FormatError::InvalidEnumerant {
            what,
            value: flag,
            offset: flag_offset,
        };

        let op = match code {
            Code::Document => {
                return Err(FormatError::UnknownOpcode {
                    byte,
                    offset: record,
                });
            }
            Code::Nop => Opcode::Nop,
            Code::LoadConst => {
                let ty = DataType::from_byte(flag).ok_or_else(|| invalid("data type"))?;
                Opcode::LoadConst(match ty {
                    DataType::Null => Constant::Null,
                    DataType::True => Constant::Bool(true),
                    DataType::False => Constant::Bool(false),
                    DataType::Integer => Constant::Integer(self.read_i32()?),
                    DataType::Long => Constant::Long(self.read_i64()?),
                    DataType::Float => Constant::Float(self.read_f64()?),
                    DataType::String => Constant::String(self.read_string()?),
                })
            }
            Code::LoadVariable => Opcode::LoadVariable(self.read_string()?),
            Code::SetVariable => Opcode::SetVariable(self.read_string()?),
            Code::Call => Opcode::Call {
                arity: flag & MAX_ARITY,
                receiver: flag & 0x80 != 0,
            },
            Code::Print => Opcode::Print { escape: flag != 0 },
            Code::Operation => {
                Opcode::Operation(Operator::from_byte(flag).ok_or_else(|| invalid("operator"))?)
            }
            Code::Jump => {
                let condition = match JumpKind::from_byte(flag) {
                    Some(JumpKind::Always) => Condition::Always,
                    Some(JumpKind::OnTrue) => Condition::IfTrue,
                    Some(JumpKind::OnFalse) => Condition::IfFalse,
                    Some(JumpKind::Exit) => {
                        return Ok(Some(Instruction {
                            address,
                            line,
                            op: Opcode::Exit,
                        }));
                    }
                    None => return Err(invalid("jump kind")),
                };
                Opcode::Jump {
                    condition,
                    target: self.read_address()?,
                }
            }
            Code::LoadMember => Opcode::LoadMember { arity: flag },
            Code::Scope => {
                Opcode::Scope(ScopeAction::from_byte(flag).ok_or_else(|| invalid("scope action"))?)
            }
            Code::Block => Opcode::Block {
                id: self.read_string()?,
            },
            Code::BlockCall => Opcode::BlockCall {
                arity: flag,
                id: self.read_string()?,
            },
            Code::Reference => Opcode::Reference {
                kind: ReferenceKind::from_byte(flag).ok_or_else(|| invalid("reference kind"))?,
                src: self.read_string()?,
            },
            Code::CastToIterator => Opcode::CastToIterator,
        };

        Ok(Some(Instruction { address, line, op }))
    }
}

/// Decode a whole artifact eagerly. Used by tooling and tests; the VM decodes
/// lazily through its loader.
pub fn decode(bytes: &[u8]) -> Result<(Header, Vec<Instruction>), FormatError> {
    let mut reader = Reader::new(bytes);
    let header = reader.read_header()?;
    let mut code = Vec::new();
    let mut previous = Address::FIRST;
    while let Some(ins) = reader.read_instruction()? {
        if ins.address <= previous {
            return Err(FormatError::OutOfOrder {
                previous: previous.get(),
                found: ins.address.get(),
            });
        }
        previous = ins.address;
        code.push(ins);
    }
    Ok((header, code))
}
