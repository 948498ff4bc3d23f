// Control records: constant-buffer metadata paired with stage bytecode
//
// The control record knows where a stage's embedded constant block lives in
// its bytecode. Replacing bytecode means pulling that block out of the old
// code and appending it to the new one.

use bytes::Bytes;

use crate::error::{ArchiveError, Result};

/// Opaque constant block carried across a bytecode replacement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstantTable(pub Vec<u8>);

pub trait ControlRecord: Sized {
    fn parse(bytes: Bytes) -> Result<Self>;

    /// Copies the constant block out of `bytecode`.
    fn extract_constants(&self, bytecode: &[u8]) -> Result<ConstantTable>;

    /// Appends `constants` to `bytecode` and records where they went.
    fn inject_constants(&mut self, bytecode: Vec<u8>, constants: &ConstantTable) -> Result<Vec<u8>>;

    fn to_bytes(&self) -> Vec<u8>;
}

pub const CONTROL_MAGIC: u32 = 0x1234_5679;

const PROGRAM_SIZE_FIELD: usize = 0x10;
const CONSTANT_OFFSET_FIELD: usize = 0x14;
const CONSTANT_SIZE_FIELD: usize = 0x18;
const MIN_CONTROL_LEN: usize = 0x1C;

const CONSTANT_ALIGNMENT: usize = 0x100;

/// NVN-style control record. Only the size and constant-block fields are
/// interpreted; every other byte is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct NvnControl {
    raw: Vec<u8>,
}

impl NvnControl {
    fn field(&self, at: usize) -> u32 {
        u32::from_le_bytes([
            self.raw[at],
            self.raw[at + 1],
            self.raw[at + 2],
            self.raw[at + 3],
        ])
    }

    fn set_field(&mut self, at: usize, value: u32) {
        self.raw[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn program_size(&self) -> u32 {
        self.field(PROGRAM_SIZE_FIELD)
    }

    pub fn constant_range(&self) -> (u32, u32) {
        (
            self.field(CONSTANT_OFFSET_FIELD),
            self.field(CONSTANT_SIZE_FIELD),
        )
    }
}

impl ControlRecord for NvnControl {
    fn parse(bytes: Bytes) -> Result<Self> {
        if bytes.len() < MIN_CONTROL_LEN {
            return Err(ArchiveError::malformed(format!(
                "control record is {} bytes, need at least {MIN_CONTROL_LEN}",
                bytes.len()
            )));
        }
        let control = Self { raw: bytes.to_vec() };
        let magic = control.field(0);
        if magic != CONTROL_MAGIC {
            return Err(ArchiveError::malformed(format!(
                "control record magic {magic:#010x}"
            )));
        }
        Ok(control)
    }

    fn extract_constants(&self, bytecode: &[u8]) -> Result<ConstantTable> {
        let (offset, size) = self.constant_range();
        if size == 0 {
            return Ok(ConstantTable::default());
        }
        let start = offset as usize;
        let end = start + size as usize;
        let block = bytecode.get(start..end).ok_or_else(|| {
            ArchiveError::malformed(format!(
                "constant block {start:#x}..{end:#x} is outside {}-byte bytecode",
                bytecode.len()
            ))
        })?;
        Ok(ConstantTable(block.to_vec()))
    }

    fn inject_constants(&mut self, mut bytecode: Vec<u8>, constants: &ConstantTable) -> Result<Vec<u8>> {
        let program_size = u32::try_from(bytecode.len())
            .map_err(|_| ArchiveError::malformed("bytecode exceeds 4 GiB"))?;
        self.set_field(PROGRAM_SIZE_FIELD, program_size);
        if constants.0.is_empty() {
            self.set_field(CONSTANT_OFFSET_FIELD, 0);
            self.set_field(CONSTANT_SIZE_FIELD, 0);
            return Ok(bytecode);
        }

        let offset = bytecode.len().next_multiple_of(CONSTANT_ALIGNMENT);
        bytecode.resize(offset, 0);
        bytecode.extend_from_slice(&constants.0);
        let offset = u32::try_from(offset)
            .map_err(|_| ArchiveError::malformed("bytecode exceeds 4 GiB"))?;
        self.set_field(CONSTANT_OFFSET_FIELD, offset);
        self.set_field(CONSTANT_SIZE_FIELD, constants.0.len() as u32);
        Ok(bytecode)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.raw.clone()
    }
}

#[cfg(test)]
pub(crate) fn sample_control(program_size: u32, constant_offset: u32, constant_size: u32) -> Vec<u8> {
    let mut raw = vec![0u8; 0x40];
    raw[0..4].copy_from_slice(&CONTROL_MAGIC.to_le_bytes());
    raw[0x20] = 0x5A;
    raw[PROGRAM_SIZE_FIELD..PROGRAM_SIZE_FIELD + 4].copy_from_slice(&program_size.to_le_bytes());
    raw[CONSTANT_OFFSET_FIELD..CONSTANT_OFFSET_FIELD + 4].copy_from_slice(&constant_offset.to_le_bytes());
    raw[CONSTANT_SIZE_FIELD..CONSTANT_SIZE_FIELD + 4].copy_from_slice(&constant_size.to_le_bytes());
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_move_to_new_bytecode() {
        let mut old = vec![0x11u8; 0x100];
        old.extend_from_slice(&[7, 7, 7, 7, 8, 8, 8, 8]);
        let mut control = NvnControl::parse(Bytes::from(sample_control(0x100, 0x100, 8))).unwrap();

        let constants = control.extract_constants(&old).unwrap();
        assert_eq!(constants.0, vec![7, 7, 7, 7, 8, 8, 8, 8]);

        let new = control.inject_constants(vec![0x22; 0x30], &constants).unwrap();
        assert_eq!(new.len(), 0x108);
        assert_eq!(&new[0x100..], &constants.0[..]);
        assert_eq!(control.program_size(), 0x30);
        assert_eq!(control.constant_range(), (0x100, 8));

        let bytes = control.to_bytes();
        assert_eq!(bytes[0x20], 0x5A);
        assert_eq!(NvnControl::parse(Bytes::from(bytes)).unwrap(), control);
    }

    #[test]
    fn empty_constant_block() {
        let mut control = NvnControl::parse(Bytes::from(sample_control(4, 0, 0))).unwrap();
        let constants = control.extract_constants(&[1, 2, 3, 4]).unwrap();
        assert!(constants.0.is_empty());
        let new = control.inject_constants(vec![9; 6], &constants).unwrap();
        assert_eq!(new, vec![9; 6]);
        assert_eq!(control.program_size(), 6);
    }

    #[test]
    fn constant_block_outside_bytecode() {
        let control = NvnControl::parse(Bytes::from(sample_control(4, 0x10, 8))).unwrap();
        assert!(control.extract_constants(&[0; 12]).is_err());
    }

    #[test]
    fn bad_magic() {
        let mut raw = sample_control(0, 0, 0);
        raw[0] = 0;
        assert!(NvnControl::parse(Bytes::from(raw)).is_err());
        assert!(NvnControl::parse(Bytes::from_static(&[0; 8])).is_err());
    }
}
