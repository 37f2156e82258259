//! In-memory view of one artifact.
//!
//! The header and the block declarations before `header_end` are decoded
//! when the artifact is opened. Everything after that is decoded on demand,
//! strictly forward, and each record only once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use quill_il::{Address, FormatError, Header, Instruction, Opcode, Reader};

#[derive(Debug, Default)]
struct Decoded {
    /// Byte offset of the next undecoded record.
    offset: usize,
    /// Decoded records, in address order.
    code: Vec<Arc<Instruction>>,
}

/// Where a block body lives. `None` means the loader holding the entry.
#[derive(Debug, Clone)]
struct BlockRef {
    loader: Option<Arc<Loader>>,
    address: Address,
}

/// A lazily decoded artifact plus its block table and layout link.
#[derive(Debug)]
pub struct Loader {
    bytes: Vec<u8>,
    header: Header,
    decoded: Mutex<Decoded>,
    declared: IndexMap<String, Address>,
    effective: Mutex<IndexMap<String, BlockRef>>,
    body: Mutex<Option<(Arc<Loader>, Address)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Loader {
    /// Parse the header and the block declarations of `bytes`.
    pub fn open(bytes: Vec<u8>) -> Result<Self, FormatError> {
        let mut reader = Reader::new(&bytes);
        let header = reader.read_header()?;
        let offset = reader.position();
        let mut loader = Self {
            header,
            decoded: Mutex::new(Decoded {
                offset,
                code: Vec::new(),
            }),
            declared: IndexMap::new(),
            effective: Mutex::new(IndexMap::new()),
            body: Mutex::new(None),
            bytes,
        };

        loader.load(loader.header.header_end)?;
        let declared: IndexMap<String, Address> = lock(&loader.decoded)
            .code
            .iter()
            .filter_map(|ins| match &ins.op {
                Opcode::Block { id } => Some((id.clone(), ins.address)),
                _ => None,
            })
            .collect();
        *lock(&loader.effective) = declared
            .iter()
            .map(|(id, address)| {
                (
                    id.clone(),
                    BlockRef {
                        loader: None,
                        address: *address,
                    },
                )
            })
            .collect();
        loader.declared = declared;

        tracing::trace!(
            source = %loader.header.source,
            blocks = loader.declared.len(),
            "opened artifact"
        );
        Ok(loader)
    }

    /// The decoded header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Canonical name of the source template.
    pub fn source(&self) -> &str {
        &self.header.source
    }

    /// First instruction of the template body.
    pub fn header_end(&self) -> Address {
        self.header.header_end
    }

    /// How many records have been decoded so far.
    pub fn decoded(&self) -> usize {
        lock(&self.decoded).code.len()
    }

    /// The instruction at `address`, decoding forward as far as needed.
    pub fn load(&self, address: Address) -> Result<Arc<Instruction>, FormatError> {
        let mut d = lock(&self.decoded);
        if let Ok(i) = d.code.binary_search_by_key(&address, |ins| ins.address) {
            return Ok(d.code[i].clone());
        }
        let out_of_range = FormatError::AddressOutOfRange {
            address: address.get(),
        };
        if d.code.last().is_some_and(|last| last.address > address) {
            return Err(out_of_range);
        }

        loop {
            let mut reader = Reader::at(&self.bytes, d.offset);
            let Some(ins) = reader.read_instruction()? else {
                return Err(out_of_range);
            };
            d.offset = reader.position();

            let previous = d.code.last().map_or(Address::FIRST, |last| last.address);
            if ins.address <= previous {
                return Err(FormatError::OutOfOrder {
                    previous: previous.get(),
                    found: ins.address.get(),
                });
            }
            tracing::trace!(source = %self.header.source, "decoded {ins}");

            let ins = Arc::new(ins);
            d.code.push(ins.clone());
            if ins.address == address {
                return Ok(ins);
            }
            if ins.address > address {
                return Err(out_of_range);
            }
        }
    }

    /// Every block this loader currently resolves, with its owner made
    /// explicit.
    fn exported(self: &Arc<Self>) -> Vec<(String, Arc<Loader>, Address)> {
        lock(&self.effective)
            .iter()
            .map(|(id, r)| {
                let owner = r.loader.clone().unwrap_or_else(|| self.clone());
                (id.clone(), owner, r.address)
            })
            .collect()
    }

    /// Resolve block `id` to the loader holding it and the address of its
    /// `Block` instruction.
    pub fn block(self: &Arc<Self>, id: &str) -> Option<(Arc<Loader>, Address)> {
        let table = lock(&self.effective);
        let r = table.get(id)?;
        Some((r.loader.clone().unwrap_or_else(|| self.clone()), r.address))
    }

    /// Bind `child`, resuming at `address`, as this layout's body. The
    /// child's blocks override the layout's own; blocks merged from an
    /// earlier child are forgotten.
    pub fn set_body(self: &Arc<Self>, child: &Arc<Loader>, address: Address) {
        let overrides = child.exported();
        let mut table: IndexMap<String, BlockRef> = self
            .declared
            .iter()
            .map(|(id, address)| {
                (
                    id.clone(),
                    BlockRef {
                        loader: None,
                        address: *address,
                    },
                )
            })
            .collect();
        for (id, owner, address) in overrides {
            let loader = (!Arc::ptr_eq(&owner, self)).then_some(owner);
            table.insert(id, BlockRef { loader, address });
        }
        *lock(&self.effective) = table;
        *lock(&self.body) = Some((child.clone(), address));
    }

    /// Make `other`'s blocks available here without replacing any block
    /// this loader already resolves.
    pub fn require(self: &Arc<Self>, other: &Arc<Loader>) {
        if Arc::ptr_eq(self, other) {
            return;
        }
        let imported = other.exported();
        let mut table = lock(&self.effective);
        for (id, owner, address) in imported {
            let loader = (!Arc::ptr_eq(&owner, self)).then_some(owner);
            table.entry(id).or_insert(BlockRef { loader, address });
        }
    }

    /// The child body bound by [`set_body`](Self::set_body).
    pub fn body(&self) -> Option<(Arc<Loader>, Address)> {
        lock(&self.body).clone()
    }

    /// Drop every link to other loaders.
    pub fn close(&self) {
        lock(&self.effective).retain(|_, r| r.loader.is_none());
        *lock(&self.body) = None;
    }
}
