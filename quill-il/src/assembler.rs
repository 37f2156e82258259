//! Two-phase address assignment.
//!
//! Phase 1 appends [`Opcode<Label>`] values and places labels as `Nop`
//! markers. Phase 2 ([`Assembler::finish`]) numbers every instruction from 1
//! and rewrites each label into the address of its marker. The assembler is
//! consumed by `finish`, so a unit can only ever be numbered once.

use crate::{Address, AssemblyError, Instruction, Opcode};

/// A symbolic jump target, valid only for the assembler that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug)]
struct Pending {
    line: u32,
    op: Opcode<Label>,
}

/// Builds the instruction list of one compiled unit.
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<Pending>,
    /// Index of each label's marker in `code`.
    labels: Vec<Option<usize>>,
}

impl Assembler {
    /// An empty unit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an instruction compiled from source line `line`.
    pub fn emit(&mut self, line: u32, op: Opcode<Label>) {
        self.code.push(Pending { line, op });
    }

    /// Allocate a label that can be jumped to before it is placed.
    pub fn label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Place `label` here by emitting its `Nop` marker.
    pub fn place(&mut self, line: u32, label: Label) -> Result<(), AssemblyError> {
        let slot = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(AssemblyError::UnplacedLabel(label))?;
        if slot.is_some() {
            return Err(AssemblyError::LabelPlacedTwice(label));
        }
        *slot = Some(self.code.len());
        self.emit(line, Opcode::Nop);
        Ok(())
    }

    /// Number of instructions emitted so far.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Whether nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Assign final addresses and resolve every label.
    pub fn finish(self) -> Result<Vec<Instruction>, AssemblyError> {
        let max = u32::MAX;
        if self.code.len() >= max as usize {
            return Err(AssemblyError::TooManyInstructions { max });
        }
        let address_of = |index: usize| Address::new(index as u32 + 1);
        let labels = self.labels;

        self.code
            .into_iter()
            .enumerate()
            .map(|(index, pending)| {
                let address =
                    address_of(index).ok_or(AssemblyError::TooManyInstructions { max })?;
                let op = pending.op.try_map_target(|label: Label| {
                    labels
                        .get(label.0 as usize)
                        .copied()
                        .flatten()
                        .and_then(address_of)
                        .ok_or(AssemblyError::UnplacedLabel(label))
                })?;
                Ok(Instruction {
                    address,
                    line: pending.line,
                    op,
                })
            })
            .collect()
    }
}
