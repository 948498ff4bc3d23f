// Option, binding and symbol records of a shader model

use bytes::Bytes;

use super::header::Revision;
use crate::error::{ArchiveError, Result};
use crate::io::writer::count;
use crate::io::{BinaryReader, BinaryWriter, Decode, Encode, ResDict};

/// A compile-time switch and where its choice lives in a program's key run.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderOption {
    pub name: String,
    /// Choice name to choice value. The position of a name is its choice index.
    pub choices: ResDict<u32>,
    pub block_offset: u16,
    pub flag: u8,
    /// Subtracted from `bit32_index` to address dynamic keys.
    pub key_offset: u8,
    pub bit32_mask: u32,
    /// Word index into the program's key run.
    pub bit32_index: u8,
    pub bit32_shift: u8,
}

impl ShaderOption {
    /// Choice index packed into a key word. Shift counts wrap modulo 32.
    pub fn choice_index(&self, key: i32) -> u32 {
        ((key as u32) & self.bit32_mask).wrapping_shr(u32::from(self.bit32_shift))
    }

    /// Name of the choice packed into `key`.
    pub fn choice_name(&self, key: i32) -> Result<&str> {
        let index = self.choice_index(key);
        self.choices
            .get_index(index as usize)
            .map(|(name, _)| name)
            .ok_or_else(|| ArchiveError::CorruptKeyTable {
                option: self.name.clone(),
                index,
                count: self.choices.len(),
            })
    }
}

/// Out-of-line slots of an option record.
pub(crate) struct OptionSlots {
    choices: usize,
    values: usize,
}

impl Decode for ShaderOption {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let name = r.load_string()?;
        let choices_offset = r.read_u64()?;
        let values_offset = r.read_u64()?;
        let choice_count = r.read_u16()? as usize;

        let (block_offset, flag, key_offset, bit32_mask, bit32_index, bit32_shift) =
            if r.revision() >= Revision::V9 {
                let block_offset = r.read_u16()?;
                r.skip(2)?;
                let flag = r.read_u8()?;
                let key_offset = r.read_u8()?;
                let mask = r.read_u32()?;
                let index = r.read_u8()?;
                let shift = r.read_u8()?;
                r.skip(2)?;
                (block_offset, flag, key_offset, mask, index, shift)
            } else {
                let block_offset = r.read_u16()?;
                let flag = r.read_u8()?;
                let key_offset = r.read_u8()?;
                let index = r.read_u8()?;
                let shift = r.read_u8()?;
                let mask = r.read_u32()?;
                r.skip(4)?;
                (block_offset, flag, key_offset, mask, index, shift)
            };

        let names = r.dict_keys_at(choices_offset)?;
        if names.len() != choice_count {
            return Err(ArchiveError::malformed(format!(
                "option '{name}' declares {choice_count} choices but its dictionary has {}",
                names.len()
            )));
        }
        let values = if choice_count == 0 {
            Vec::new()
        } else {
            r.at(values_offset, |r| r.read_u32s(choice_count))?
        };

        Ok(Self {
            name,
            choices: names.into_iter().zip(values).collect(),
            block_offset,
            flag,
            key_offset,
            bit32_mask,
            bit32_index,
            bit32_shift,
        })
    }
}

impl ShaderOption {
    pub(crate) fn write_record(&self, w: &mut BinaryWriter) -> Result<OptionSlots> {
        w.write_string(&self.name);
        let choices = w.reserve_offset();
        let values = w.reserve_offset();
        w.write_u16(count("option choices", self.choices.len())?);
        if w.revision() >= Revision::V9 {
            w.write_u16(self.block_offset);
            w.write_u16(0);
            w.write_u8(self.flag);
            w.write_u8(self.key_offset);
            w.write_u32(self.bit32_mask);
            w.write_u8(self.bit32_index);
            w.write_u8(self.bit32_shift);
            w.write_u16(0);
        } else {
            w.write_u16(self.block_offset);
            w.write_u8(self.flag);
            w.write_u8(self.key_offset);
            w.write_u8(self.bit32_index);
            w.write_u8(self.bit32_shift);
            w.write_u32(self.bit32_mask);
            w.write_u32(0);
        }
        Ok(OptionSlots { choices, values })
    }

    pub(crate) fn write_blocks(&self, w: &mut BinaryWriter, slots: OptionSlots) -> Result<()> {
        if self.choices.is_empty() {
            return Ok(());
        }
        w.write_dict_keys(slots.choices, self.choices.keys())?;
        w.place(slots.values);
        for value in self.choices.values() {
            w.write_u32(*value);
        }
        Ok(())
    }
}

/// Writes an option dictionary: keys, records, then each record's choices.
pub(crate) fn write_options(
    w: &mut BinaryWriter,
    slots: crate::io::DictSlots,
    options: &ResDict<ShaderOption>,
) -> Result<()> {
    if options.is_empty() {
        return Ok(());
    }
    w.write_dict_keys(slots.dict, options.keys())?;
    w.place(slots.values);
    let mut pending = Vec::with_capacity(options.len());
    for option in options.values() {
        pending.push(option.write_record(w)?);
    }
    for (option, slots) in options.values().zip(pending) {
        option.write_blocks(w, slots)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub index: u8,
    pub location: i8,
}

impl Decode for Attribute {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            index: r.read_u8()?,
            location: r.read_i8()?,
        })
    }
}

impl Encode for Attribute {
    fn encode(&self, w: &mut BinaryWriter) -> Result<()> {
        w.write_u8(self.index);
        w.write_i8(self.location);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sampler {
    pub annotation: String,
    pub index: u8,
}

impl Decode for Sampler {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let annotation = r.load_string()?;
        let index = r.read_u8()?;
        r.skip(7)?;
        Ok(Self { annotation, index })
    }
}

impl Encode for Sampler {
    fn encode(&self, w: &mut BinaryWriter) -> Result<()> {
        w.write_string(&self.annotation);
        w.write_u8(self.index);
        w.write_zeros(7);
        Ok(())
    }
}

/// Image binding. Same record shape as a sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub annotation: String,
    pub index: u8,
}

impl Decode for ImageBuffer {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let Sampler { annotation, index } = Sampler::decode(r)?;
        Ok(Self { annotation, index })
    }
}

impl Encode for ImageBuffer {
    fn encode(&self, w: &mut BinaryWriter) -> Result<()> {
        w.write_string(&self.annotation);
        w.write_u8(self.index);
        w.write_zeros(7);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageBuffer {
    pub unknowns: [u32; 8],
}

impl Decode for StorageBuffer {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let mut unknowns = [0u32; 8];
        for word in &mut unknowns {
            *word = r.read_u32()?;
        }
        Ok(Self { unknowns })
    }
}

impl Encode for StorageBuffer {
    fn encode(&self, w: &mut BinaryWriter) -> Result<()> {
        for word in self.unknowns {
            w.write_u32(word);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderUniform {
    pub name: String,
    pub index: i32,
    pub data_offset: u16,
    pub block_index: u8,
}

impl Decode for ShaderUniform {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let name = r.load_string()?;
        let index = r.read_i32()?;
        let data_offset = r.read_u16()?;
        let block_index = r.read_u8()?;
        r.skip(1)?;
        Ok(Self {
            name,
            index,
            data_offset,
            block_index,
        })
    }
}

impl Encode for ShaderUniform {
    fn encode(&self, w: &mut BinaryWriter) -> Result<()> {
        w.write_string(&self.name);
        w.write_i32(self.index);
        w.write_u16(self.data_offset);
        w.write_u8(self.block_index);
        w.write_u8(0);
        Ok(())
    }
}

/// A constant buffer and its default contents.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    pub index: u8,
    pub kind: u8,
    pub size: u16,
    pub uniforms: ResDict<ShaderUniform>,
    /// Either empty or exactly `size` bytes.
    pub default_buffer: Bytes,
}

pub(crate) struct UniformBlockSlots {
    uniforms: usize,
    dict: usize,
    defaults: usize,
}

impl Decode for UniformBlock {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let uniforms_offset = r.read_u64()?;
        let dict_offset = r.read_u64()?;
        let defaults_offset = r.read_u64()?;
        let index = r.read_u8()?;
        let kind = r.read_u8()?;
        let size = r.read_u16()?;
        let uniform_count = r.read_u16()?;
        r.skip(2)?;

        let uniforms = r.dict_at::<ShaderUniform>(dict_offset, uniforms_offset)?;
        if uniforms.len() != uniform_count as usize {
            return Err(ArchiveError::malformed(format!(
                "uniform block {index} declares {uniform_count} uniforms, dictionary has {}",
                uniforms.len()
            )));
        }
        let default_buffer = if defaults_offset == 0 {
            Bytes::new()
        } else {
            r.sub_range(defaults_offset, u64::from(size))?
        };

        Ok(Self {
            index,
            kind,
            size,
            uniforms,
            default_buffer,
        })
    }
}

impl UniformBlock {
    pub(crate) fn write_record(&self, w: &mut BinaryWriter) -> Result<UniformBlockSlots> {
        let uniforms = w.reserve_offset();
        let dict = w.reserve_offset();
        let defaults = w.reserve_offset();
        w.write_u8(self.index);
        w.write_u8(self.kind);
        w.write_u16(self.size);
        w.write_u16(count("uniforms", self.uniforms.len())?);
        w.write_u16(0);
        Ok(UniformBlockSlots {
            uniforms,
            dict,
            defaults,
        })
    }

    pub(crate) fn write_blocks(&self, w: &mut BinaryWriter, slots: UniformBlockSlots) -> Result<()> {
        w.write_dict(
            crate::io::DictSlots {
                values: slots.uniforms,
                dict: slots.dict,
            },
            &self.uniforms,
        )?;
        if !self.default_buffer.is_empty() {
            if self.default_buffer.len() != self.size as usize {
                return Err(ArchiveError::malformed(format!(
                    "uniform block {} has {} default bytes for a {}-byte block",
                    self.index,
                    self.default_buffer.len(),
                    self.size
                )));
            }
            w.place(slots.defaults);
            w.write_bytes(&self.default_buffer);
        }
        Ok(())
    }
}

pub(crate) fn write_uniform_blocks(
    w: &mut BinaryWriter,
    slots: crate::io::DictSlots,
    blocks: &ResDict<UniformBlock>,
) -> Result<()> {
    if blocks.is_empty() {
        return Ok(());
    }
    w.write_dict_keys(slots.dict, blocks.keys())?;
    w.place(slots.values);
    let mut pending = Vec::with_capacity(blocks.len());
    for block in blocks.values() {
        pending.push(block.write_record(w)?);
    }
    for (block, slots) in blocks.values().zip(pending) {
        block.write_blocks(w, slots)?;
    }
    Ok(())
}

/// Source-level names of bindings. Secondary strings exist below major 8.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SymbolEntry {
    pub name: String,
    pub value: String,
    pub name2: String,
    pub value2: String,
}

impl Decode for SymbolEntry {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let name = r.load_string()?;
        if r.revision() >= Revision::V8 {
            return Ok(Self {
                name,
                ..Self::default()
            });
        }
        Ok(Self {
            name,
            value: r.load_string()?,
            name2: r.load_string()?,
            value2: r.load_string()?,
        })
    }
}

impl Encode for SymbolEntry {
    fn encode(&self, w: &mut BinaryWriter) -> Result<()> {
        w.write_string(&self.name);
        if w.revision() < Revision::V8 {
            w.write_string(&self.value);
            w.write_string(&self.name2);
            w.write_string(&self.value2);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolKind {
    Samplers,
    Images,
    UniformBlocks,
    StorageBuffers,
}

/// The four u64 offset slots of a symbol table, in stream order.
fn symbol_slots(revision: Revision) -> [Option<SymbolKind>; 4] {
    use SymbolKind::*;
    match revision {
        Revision::V8 | Revision::V9 => [
            Some(Samplers),
            Some(Images),
            Some(UniformBlocks),
            Some(StorageBuffers),
        ],
        Revision::V7 => [Some(Samplers), Some(UniformBlocks), Some(StorageBuffers), None],
        Revision::V4 => [Some(Samplers), Some(UniformBlocks), None, None],
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SymbolTable {
    pub samplers: Vec<SymbolEntry>,
    pub images: Vec<SymbolEntry>,
    pub uniform_blocks: Vec<SymbolEntry>,
    pub storage_buffers: Vec<SymbolEntry>,
}

/// Entry counts taken from the owning model's collections.
pub(crate) struct SymbolCounts {
    pub samplers: usize,
    pub images: usize,
    pub uniform_blocks: usize,
    pub storage_buffers: usize,
}

impl SymbolTable {
    pub(crate) fn decode(r: &mut BinaryReader, counts: &SymbolCounts) -> Result<Self> {
        let mut table = SymbolTable::default();
        for kind in symbol_slots(r.revision()) {
            let offset = r.read_u64()?;
            let Some(kind) = kind else { continue };
            let (entries, n) = match kind {
                SymbolKind::Samplers => (&mut table.samplers, counts.samplers),
                SymbolKind::Images => (&mut table.images, counts.images),
                SymbolKind::UniformBlocks => (&mut table.uniform_blocks, counts.uniform_blocks),
                SymbolKind::StorageBuffers => (&mut table.storage_buffers, counts.storage_buffers),
            };
            *entries = r.array_at::<SymbolEntry>(offset, n)?;
        }
        Ok(table)
    }

    /// Writes the table at the current position and its entry arrays after it.
    pub(crate) fn write(&self, w: &mut BinaryWriter) -> Result<()> {
        let layout = symbol_slots(w.revision());
        let slots: Vec<usize> = layout.iter().map(|_| w.reserve_offset()).collect();
        for (kind, slot) in layout.into_iter().zip(slots) {
            let entries = match kind {
                Some(SymbolKind::Samplers) => &self.samplers,
                Some(SymbolKind::Images) => &self.images,
                Some(SymbolKind::UniformBlocks) => &self.uniform_blocks,
                Some(SymbolKind::StorageBuffers) => &self.storage_buffers,
                None => continue,
            };
            w.write_array(slot, entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(mask: u32, shift: u8) -> ShaderOption {
        ShaderOption {
            name: "QUALITY".into(),
            choices: [("LOW".to_string(), 0u32), ("HIGH".to_string(), 1)]
                .into_iter()
                .collect(),
            block_offset: 0,
            flag: 0,
            key_offset: 0,
            bit32_mask: mask,
            bit32_index: 0,
            bit32_shift: shift,
        }
    }

    #[test]
    fn choice_index_masks_then_shifts() {
        let opt = option(0x0000_0030, 4);
        assert_eq!(opt.choice_index(0x10), 1);
        assert_eq!(opt.choice_index(0x7F), 3);
        assert_eq!(opt.choice_index(-1), 3);
        // 40 wraps to a shift of 8.
        assert_eq!(option(0x0000_3000, 40).choice_index(0x1000), 0x10);
        assert_eq!(option(0xFFFF_FFFF, 40).choice_index(-1), 0x00FF_FFFF);
    }

    #[test]
    fn out_of_range_choice_is_corrupt() {
        let opt = option(0x3, 0);
        assert_eq!(opt.choice_name(1).unwrap(), "HIGH");
        match opt.choice_name(2) {
            Err(ArchiveError::CorruptKeyTable { option, index, count }) => {
                assert_eq!(option, "QUALITY");
                assert_eq!(index, 2);
                assert_eq!(count, 2);
            }
            other => panic!("expected corrupt key table, got {other:?}"),
        }
    }

    #[test]
    fn option_record_layout_differs_from_major_nine() {
        for revision in [Revision::V8, Revision::V9] {
            let mut w = BinaryWriter::new(revision);
            let opt = option(0xF0, 4);
            let slots = opt.write_record(&mut w).unwrap();
            assert_eq!(w.position(), 40);
            opt.write_blocks(&mut w, slots).unwrap();
            w.finish_strings().unwrap();

            let mut r = BinaryReader::new(Bytes::from(w.into_inner()), revision);
            assert_eq!(ShaderOption::decode(&mut r).unwrap(), opt);
            assert_eq!(r.position(), 40);
        }
    }

    fn distinct_option() -> ShaderOption {
        ShaderOption {
            block_offset: 0x1122,
            flag: 0x33,
            key_offset: 0x44,
            bit32_mask: 0x5566_7788,
            bit32_index: 0x99,
            bit32_shift: 0x0A,
            ..option(0, 0)
        }
    }

    #[test]
    fn option_record_field_offsets_before_major_nine() {
        let mut w = BinaryWriter::new(Revision::V8);
        distinct_option().write_record(&mut w).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[24..26], &2u16.to_le_bytes());
        assert_eq!(&bytes[26..28], &0x1122u16.to_le_bytes());
        assert_eq!(bytes[28], 0x33);
        assert_eq!(bytes[29], 0x44);
        assert_eq!(bytes[30], 0x99);
        assert_eq!(bytes[31], 0x0A);
        assert_eq!(&bytes[32..36], &0x5566_7788u32.to_le_bytes());
        assert_eq!(&bytes[36..40], &[0; 4]);
    }

    #[test]
    fn option_record_field_offsets_from_major_nine() {
        let mut w = BinaryWriter::new(Revision::V9);
        distinct_option().write_record(&mut w).unwrap();
        let bytes = w.into_inner();
        assert_eq!(bytes.len(), 40);
        assert_eq!(&bytes[24..26], &2u16.to_le_bytes());
        assert_eq!(&bytes[26..28], &0x1122u16.to_le_bytes());
        assert_eq!(&bytes[28..30], &[0; 2]);
        assert_eq!(bytes[30], 0x33);
        assert_eq!(bytes[31], 0x44);
        assert_eq!(&bytes[32..36], &0x5566_7788u32.to_le_bytes());
        assert_eq!(bytes[36], 0x99);
        assert_eq!(bytes[37], 0x0A);
        assert_eq!(&bytes[38..40], &[0; 2]);
    }

    #[test]
    fn hand_built_option_records_decode() {
        // name, choices dict and values offsets all zero: no choices.
        let mut old = vec![0u8; 40];
        old[26..28].copy_from_slice(&0x1122u16.to_le_bytes());
        old[28] = 0x33;
        old[29] = 0x44;
        old[30] = 0x99;
        old[31] = 0x0A;
        old[32..36].copy_from_slice(&0x5566_7788u32.to_le_bytes());

        let mut new = vec![0u8; 40];
        new[26..28].copy_from_slice(&0x1122u16.to_le_bytes());
        new[30] = 0x33;
        new[31] = 0x44;
        new[32..36].copy_from_slice(&0x5566_7788u32.to_le_bytes());
        new[36] = 0x99;
        new[37] = 0x0A;

        for (revision, raw) in [(Revision::V8, old), (Revision::V9, new)] {
            let mut r = BinaryReader::new(Bytes::from(raw), revision);
            let decoded = ShaderOption::decode(&mut r).unwrap();
            assert_eq!(r.position(), 40, "{revision:?}");
            assert_eq!(decoded.block_offset, 0x1122);
            assert_eq!(decoded.flag, 0x33);
            assert_eq!(decoded.key_offset, 0x44);
            assert_eq!(decoded.bit32_mask, 0x5566_7788);
            assert_eq!(decoded.bit32_index, 0x99);
            assert_eq!(decoded.bit32_shift, 0x0A);
            assert!(decoded.choices.is_empty());
        }
    }
}
