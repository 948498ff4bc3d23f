// Bounds-checked little-endian reader over a shared archive buffer

use bytes::Bytes;

use super::{ResDict, DICT_MAGIC, DICT_NODE_LEN};
use crate::archive::header::Revision;
use crate::error::{ArchiveError, Result};

/// A record that can be decoded at the reader's current position.
pub trait Decode: Sized {
    fn decode(reader: &mut BinaryReader) -> Result<Self>;
}

/// Positioned reader carrying the layout revision of the archive being read.
///
/// Every offset is absolute within `data`. Sub-range readers made with
/// [`BinaryReader::sub_reader`] see offsets relative to their own start.
pub struct BinaryReader {
    data: Bytes,
    pos: usize,
    revision: Revision,
}

impl BinaryReader {
    pub fn new(data: Bytes, revision: Revision) -> Self {
        Self {
            data,
            pos: 0,
            revision,
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        let offset = usize::try_from(offset)
            .ok()
            .filter(|&o| o <= self.data.len())
            .ok_or_else(|| {
                ArchiveError::malformed(format!(
                    "offset {offset:#x} is outside the {}-byte stream",
                    self.data.len()
                ))
            })?;
        self.pos = offset;
        Ok(())
    }

    /// Runs `f` at `offset`, then restores the current position.
    pub fn at<T>(&mut self, offset: u64, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = self.pos;
        self.seek(offset)?;
        let value = f(self);
        self.pos = saved;
        value
    }

    /// Zero-copy view of `[offset, offset + len)`.
    pub fn sub_range(&self, offset: u64, len: u64) -> Result<Bytes> {
        let (start, end) = self.range(offset, len)?;
        Ok(self.data.slice(start..end))
    }

    /// A reader over `[offset, offset + len)` whose offsets start at zero.
    pub fn sub_reader(&self, offset: u64, len: u64) -> Result<BinaryReader> {
        Ok(BinaryReader::new(self.sub_range(offset, len)?, self.revision))
    }

    fn range(&self, offset: u64, len: u64) -> Result<(usize, usize)> {
        let end = offset.checked_add(len).ok_or_else(|| {
            ArchiveError::malformed(format!("range {offset:#x}+{len:#x} overflows"))
        })?;
        if end > self.data.len() as u64 {
            return Err(ArchiveError::malformed(format!(
                "range {offset:#x}..{end:#x} is outside the {}-byte stream",
                self.data.len()
            )));
        }
        Ok((offset as usize, end as usize))
    }

    pub fn read_slice(&mut self, len: usize) -> Result<Bytes> {
        let bytes = self.sub_range(self.pos as u64, len as u64)?;
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let (start, end) = self.range(self.pos as u64, N as u64)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[start..end]);
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.range(self.pos as u64, len as u64)?;
        self.pos += len;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32s(&mut self, count: usize) -> Result<Vec<u32>> {
        (0..count).map(|_| self.read_u32()).collect()
    }

    pub fn read_i32s(&mut self, count: usize) -> Result<Vec<i32>> {
        (0..count).map(|_| self.read_i32()).collect()
    }

    /// Reads a pooled string reference. Offset zero is the empty string.
    pub fn load_string(&mut self) -> Result<String> {
        let offset = self.read_u64()?;
        self.string_at(offset)
    }

    pub fn string_at(&mut self, offset: u64) -> Result<String> {
        if offset == 0 {
            return Ok(String::new());
        }
        self.at(offset, |r| {
            let len = r.read_u16()? as usize;
            let raw = r.read_slice(len)?;
            String::from_utf8(raw.to_vec()).map_err(|_| {
                ArchiveError::malformed(format!("string at {offset:#x} is not valid UTF-8"))
            })
        })
    }

    /// Keys of the dictionary block at `offset`, in node order.
    pub fn dict_keys_at(&mut self, offset: u64) -> Result<Vec<String>> {
        if offset == 0 {
            return Ok(Vec::new());
        }
        self.at(offset, |r| {
            let magic = r.read_array::<4>()?;
            if magic != DICT_MAGIC {
                return Err(ArchiveError::malformed(format!(
                    "expected dictionary magic at {offset:#x}, found {magic:02x?}"
                )));
            }
            let count = r.read_u32()? as usize;
            r.skip(DICT_NODE_LEN)?;
            (0..count)
                .map(|_| {
                    r.skip(8)?;
                    r.load_string()
                })
                .collect()
        })
    }

    /// Dictionary whose keys are at `dict_offset` and values at `values_offset`.
    pub fn dict_at<T: Decode>(&mut self, dict_offset: u64, values_offset: u64) -> Result<ResDict<T>> {
        let keys = self.dict_keys_at(dict_offset)?;
        if keys.is_empty() {
            return Ok(ResDict::new());
        }
        let values = self.array_at::<T>(values_offset, keys.len())?;
        Ok(keys.into_iter().zip(values).collect())
    }

    /// Reads an in-stream dictionary reference: values offset, then dictionary offset.
    pub fn load_dict<T: Decode>(&mut self) -> Result<ResDict<T>> {
        let values_offset = self.read_u64()?;
        let dict_offset = self.read_u64()?;
        self.dict_at(dict_offset, values_offset)
    }

    pub fn array_at<T: Decode>(&mut self, offset: u64, count: usize) -> Result<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.at(offset, |r| (0..count).map(|_| T::decode(r)).collect())
    }
}
