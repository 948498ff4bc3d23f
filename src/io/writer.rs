// Little-endian writer with patchable offset slots and a string pool
//
// Offsets are written as zeroed u64 slots first and patched once their
// target is placed. Strings are collected and emitted as one pool at the end.

use std::collections::HashMap;

use super::dict::build_tree;
use super::{ResDict, DICT_MAGIC};
use crate::archive::header::Revision;
use crate::error::{ArchiveError, Result};

/// A fixed-size record with no out-of-line children besides pooled strings.
pub trait Encode {
    fn encode(&self, writer: &mut BinaryWriter) -> Result<()>;
}

/// Slots of an in-stream dictionary reference.
#[derive(Debug, Clone, Copy)]
pub struct DictSlots {
    pub values: usize,
    pub dict: usize,
}

pub struct BinaryWriter {
    buf: Vec<u8>,
    revision: Revision,
    strings: Vec<(usize, String)>,
}

impl BinaryWriter {
    pub fn new(revision: Revision) -> Self {
        Self {
            buf: Vec::new(),
            revision,
            strings: Vec::new(),
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn align(&mut self, alignment: usize) {
        let padded = self.buf.len().next_multiple_of(alignment);
        self.buf.resize(padded, 0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_zeros(&mut self, len: usize) {
        self.buf.resize(self.buf.len() + len, 0);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// Writes a zeroed u64 offset and returns its position for patching.
    pub fn reserve_offset(&mut self) -> usize {
        let slot = self.position();
        self.write_u64(0);
        slot
    }

    pub fn reserve_dict(&mut self) -> DictSlots {
        let values = self.reserve_offset();
        let dict = self.reserve_offset();
        DictSlots { values, dict }
    }

    pub fn patch_bytes(&mut self, at: usize, bytes: &[u8]) {
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn patch_offset(&mut self, slot: usize, target: usize) {
        self.patch_bytes(slot, &(target as u64).to_le_bytes());
    }

    /// Aligns to eight bytes and points `slot` at the new position.
    pub fn place(&mut self, slot: usize) -> usize {
        self.align(8);
        let pos = self.position();
        self.patch_offset(slot, pos);
        pos
    }

    /// Writes a pooled string reference. The empty string is offset zero.
    pub fn write_string(&mut self, s: &str) {
        let slot = self.reserve_offset();
        if !s.is_empty() {
            self.strings.push((slot, s.to_owned()));
        }
    }

    /// Emits a `_DIC` block for `keys` and points `slot` at it.
    pub fn write_dict_keys<'k>(
        &mut self,
        slot: usize,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<()> {
        let keys: Vec<&str> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(());
        }
        let nodes = build_tree(&keys)?;
        self.place(slot);
        self.write_bytes(&DICT_MAGIC);
        self.write_u32(keys.len() as u32);
        for (i, node) in nodes.iter().enumerate() {
            self.write_i32(node.reference);
            self.write_u16(node.left);
            self.write_u16(node.right);
            let key = if i == 0 { "" } else { keys[i - 1] };
            self.write_string(key);
        }
        Ok(())
    }

    /// Emits the key block and the value array of a dictionary of leaf records.
    pub fn write_dict<T: Encode>(&mut self, slots: DictSlots, dict: &ResDict<T>) -> Result<()> {
        if dict.is_empty() {
            return Ok(());
        }
        self.write_dict_keys(slots.dict, dict.keys())?;
        self.place(slots.values);
        for value in dict.values() {
            value.encode(self)?;
        }
        Ok(())
    }

    pub fn write_array<T: Encode>(&mut self, slot: usize, values: &[T]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.place(slot);
        for value in values {
            value.encode(self)?;
        }
        Ok(())
    }

    /// Emits the string pool and patches every string reference.
    /// Returns the pool's start offset.
    pub fn finish_strings(&mut self) -> Result<usize> {
        self.align(8);
        let start = self.position();
        let mut placed: HashMap<String, usize> = HashMap::new();
        let pending = std::mem::take(&mut self.strings);
        for (slot, s) in pending {
            let target = match placed.get(&s) {
                Some(&target) => target,
                None => {
                    let len = u16::try_from(s.len()).map_err(|_| {
                        ArchiveError::malformed(format!("string of {} bytes is too long", s.len()))
                    })?;
                    self.align(2);
                    let target = self.position();
                    self.write_u16(len);
                    self.write_bytes(s.as_bytes());
                    self.write_u8(0);
                    placed.insert(s, target);
                    target
                }
            };
            self.patch_offset(slot, target);
        }
        Ok(start)
    }
}

/// Narrows a collection length into a fixed-width count field.
pub(crate) fn count<T: TryFrom<usize>>(what: &str, len: usize) -> Result<T> {
    T::try_from(len).map_err(|_| ArchiveError::malformed(format!("too many {what}: {len}")))
}
