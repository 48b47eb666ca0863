//! Order-independent reassembly of aligned byte chunks.

use bit_vec::BitVec;
use log::*;

use crate::chunk::DataChunk;


/// Reassembles a byte stream from chunks that may arrive in any order.
///
/// The stream is divided into slots of `alignment` bytes each. A chunk
/// must cover its slot exactly, except the final chunk of the stream,
/// which may stop short when the total length is not a multiple of the
/// alignment. The total length can be declared up front, pinned later
/// through [`set_length`](DataAssembler::set_length), or deduced the
/// moment a short final chunk arrives.
///
/// Adding is commutative over distinct slots and idempotent over
/// identical re-adds; a re-add carrying different bytes is a collision.
#[derive(PartialEq, Debug, Clone)]
pub struct DataAssembler {
    alignment: usize,
    length: Option<usize>,
    slots: BitVec,
    storage: Vec<u8>,
}

impl DataAssembler {

    /// Creates an assembler for a stream of as yet unknown length.
    ///
    /// # Panics
    ///
    /// Panics when `alignment` is zero.
    pub fn new(alignment: usize) -> Self {
        assert!(alignment > 0, "alignment must be positive");

        Self {
            alignment,
            length: None,
            slots: BitVec::new(),
            storage: Vec::new(),
        }
    }

    /// Creates an assembler for a stream whose total length is already
    /// known, so every chunk is validated against the final geometry from
    /// the start.
    ///
    /// # Panics
    ///
    /// Panics when `alignment` is zero.
    pub fn with_length(alignment: usize, length: usize) -> Self {
        let mut assembler = Self::new(alignment);
        assembler.length = Some(length);
        assembler.slots = BitVec::from_elem(slot_count(length, alignment), false);
        assembler.storage = vec![ 0; length ];
        assembler
    }

    /// The slot stride this assembler was created with.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// The total stream length, once declared or deduced.
    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// Declares the total stream length after construction.
    ///
    /// The transition is one-way: declaring the same length again is a
    /// no-op, while declaring a different one once a length is known is a
    /// conflict. The new length must also cover every slot already
    /// written.
    pub fn set_length(&mut self, length: usize) -> Result<(), AssembleError> {
        if let Some(current) = self.length {
            if current == length {
                return Ok(());
            }

            return Err(AssembleError::LengthConflict { current, proposed: length });
        }

        let written = self.written_end();
        if length < written {
            debug!("Proposed length {} contradicts {} bytes already written", length, written);
            return Err(AssembleError::PastEnd { offset: written, length });
        }

        let wanted = slot_count(length, self.alignment);
        if wanted > self.slots.len() {
            self.slots.grow(wanted - self.slots.len(), false);
        }

        self.storage.resize(length, 0);
        self.length = Some(length);
        Ok(())
    }

    /// Adds `data` at `offset` bytes into the stream.
    ///
    /// The offset must sit on an alignment boundary, and the chunk must
    /// fill its slot completely unless it is the final chunk of the
    /// stream. While the length is unknown, a chunk shorter than the
    /// alignment is accepted only past every written slot and past the
    /// first one, and pins the total length to `offset + data.len()`.
    /// Re-adding the bytes a slot already holds is a no-op; differing
    /// bytes are a collision, and the assembler is left untouched by any
    /// failed add.
    pub fn add(&mut self, data: &[u8], offset: usize) -> Result<(), AssembleError> {
        if offset % self.alignment != 0 {
            return Err(AssembleError::MisalignedOffset { offset, alignment: self.alignment });
        }

        if data.is_empty() {
            return Err(AssembleError::EmptyChunk { offset });
        }

        if data.len() > self.alignment {
            return Err(AssembleError::OversizedChunk { length: data.len(), alignment: self.alignment });
        }

        if let Some(total) = self.length {
            if offset >= total {
                return Err(AssembleError::PastEnd { offset, length: total });
            }
        }

        let slot = offset / self.alignment;

        if self.slots.get(slot).unwrap_or(false) {
            // Idempotent re-add: identical content is accepted silently,
            // anything else taints the stream.
            let stored = self.slot_len(slot);
            if data.len() == stored && self.storage[offset .. offset + stored] == *data {
                trace!("Slot {} re-added with identical bytes", slot);
                return Ok(());
            }

            return Err(AssembleError::Collision { offset });
        }

        match self.length {
            Some(total) => {
                let expected = if slot == slot_count(total, self.alignment) - 1 {
                    total - offset
                }
                else {
                    self.alignment
                };

                if data.len() != expected {
                    return Err(AssembleError::WrongChunkLength { length: data.len(), expected });
                }
            }

            None => {
                if data.len() < self.alignment {
                    // A short chunk can only be the stream's last. With
                    // the length unknown, that can only be shown for a
                    // chunk beyond everything written so far — and never
                    // in the first slot, which would make the stream
                    // shorter than one alignment.
                    if offset < self.alignment.max(self.written_end()) {
                        return Err(AssembleError::WrongChunkLength {
                            length: data.len(),
                            expected: self.alignment,
                        });
                    }

                    self.set_length(offset + data.len())?;
                }
            }
        }

        if self.length.is_none() {
            let needed = offset + data.len();
            if self.storage.len() < needed {
                self.storage.resize(needed, 0);
            }

            if self.slots.len() <= slot {
                self.slots.grow(slot + 1 - self.slots.len(), false);
            }
        }

        self.storage[offset .. offset + data.len()].copy_from_slice(data);
        self.slots.set(slot, true);
        trace!("Added {} bytes at offset {} (slot {})", data.len(), offset, slot);
        Ok(())
    }

    /// Adds a decoded answer chunk.
    pub fn add_chunk(&mut self, chunk: &DataChunk) -> Result<(), AssembleError> {
        self.add(&chunk.data, chunk.offset)
    }

    /// Whether the total length is known and every slot has been filled.
    pub fn is_complete(&self) -> bool {
        self.length.is_some() && self.slots.all()
    }

    /// Returns the fully reassembled stream.
    pub fn bytes(&self) -> Result<Vec<u8>, AssembleError> {
        if self.is_complete() {
            Ok(self.storage.clone())
        }
        else {
            Err(AssembleError::Incomplete)
        }
    }

    /// Returns the stream as reassembled so far, with unwritten regions
    /// left as zero bytes.
    pub fn partial_bytes(&self) -> Vec<u8> {
        self.storage.clone()
    }

    /// How many bytes a chunk covering `slot` holds.
    fn slot_len(&self, slot: usize) -> usize {
        let start = slot * self.alignment;

        match self.length {
            Some(total) => self.alignment.min(total - start),
            None => self.alignment,
        }
    }

    /// Exclusive end of the highest slot written so far. Only meaningful
    /// while the length is unknown, when every written slot is full.
    fn written_end(&self) -> usize {
        let mut end = 0;
        for (slot, written) in self.slots.iter().enumerate() {
            if written {
                end = (slot + 1) * self.alignment;
            }
        }

        end
    }
}


/// How many aligned slots a stream of `length` bytes divides into.
fn slot_count(length: usize, alignment: usize) -> usize {
    (length + alignment - 1) / alignment
}


/// Something that can go wrong feeding chunks into an assembler.
#[derive(PartialEq, Debug, Copy, Clone)]
pub enum AssembleError {

    /// The chunk's offset does not sit on an alignment boundary.
    MisalignedOffset {

        /// The offending offset.
        offset: usize,

        /// The assembler's slot stride.
        alignment: usize,
    },

    /// The chunk carries no bytes at all.
    EmptyChunk {

        /// Where the empty chunk pointed.
        offset: usize,
    },

    /// The chunk carries more bytes than one slot holds.
    OversizedChunk {

        /// How many bytes the chunk carries.
        length: usize,

        /// The assembler's slot stride.
        alignment: usize,
    },

    /// The chunk starts at or past the end of the stream — or, when a
    /// length is being declared, a written slot already extends past the
    /// proposed end.
    PastEnd {

        /// The chunk offset, or the end of the conflicting written slot.
        offset: usize,

        /// The stream length it falls foul of.
        length: usize,
    },

    /// The chunk does not fill its slot: every slot takes exactly one
    /// alignment's worth of bytes except the final one, which must reach
    /// the stream's end exactly.
    WrongChunkLength {

        /// How many bytes the chunk carries.
        length: usize,

        /// How many its slot requires.
        expected: usize,
    },

    /// The slot was already filled with different bytes.
    Collision {

        /// Offset of the twice-written slot.
        offset: usize,
    },

    /// A stream length was already known and a different one was
    /// declared.
    LengthConflict {

        /// The length already in force.
        current: usize,

        /// The length that contradicted it.
        proposed: usize,
    },

    /// The stream still has unfilled slots, or its total length is not
    /// yet known.
    Incomplete,
}

impl AssembleError {

    /// Whether this error reports conflicting observations of the stream
    /// rather than a structurally impossible chunk. Conflicts taint the
    /// stream but are survivable; structural errors point at a broken
    /// caller or data source.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Collision { .. } | Self::PastEnd { .. } | Self::LengthConflict { .. })
    }
}
