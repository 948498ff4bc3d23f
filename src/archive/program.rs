// Precompiled program variants and their per-stage binding tables

use super::header::Revision;
use crate::bytecode::{VARIATION_ARRAY_OFFSET, VARIATION_STRIDE};
use crate::error::{ArchiveError, Result};
use crate::io::writer::count;
use crate::io::{BinaryReader, BinaryWriter, Decode, Encode};

/// Binding location of one resource in each stage; -1 means unused.
///
/// Geometry and compute are not stored from major 9 and read back as -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLocations {
    pub vertex: i32,
    pub geometry: i32,
    pub fragment: i32,
    pub compute: i32,
}

impl Default for StageLocations {
    fn default() -> Self {
        Self {
            vertex: -1,
            geometry: -1,
            fragment: -1,
            compute: -1,
        }
    }
}

impl Decode for StageLocations {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        if r.revision().has_two_stage_locations() {
            let vertex = r.read_i32()?;
            let fragment = r.read_i32()?;
            return Ok(Self {
                vertex,
                fragment,
                ..Self::default()
            });
        }
        Ok(Self {
            vertex: r.read_i32()?,
            geometry: r.read_i32()?,
            fragment: r.read_i32()?,
            compute: r.read_i32()?,
        })
    }
}

impl Encode for StageLocations {
    fn encode(&self, w: &mut BinaryWriter) -> Result<()> {
        w.write_i32(self.vertex);
        if w.revision().has_two_stage_locations() {
            w.write_i32(self.fragment);
        } else {
            w.write_i32(self.geometry);
            w.write_i32(self.fragment);
            w.write_i32(self.compute);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShaderProgram {
    pub uniform_block_locations: Vec<StageLocations>,
    pub sampler_locations: Vec<StageLocations>,
    /// Major 8 and later.
    pub image_locations: Vec<StageLocations>,
    /// Major 7 and later.
    pub storage_buffer_locations: Vec<StageLocations>,
    /// Dense index of this program's variation in the bytecode container.
    pub variation_index: i32,
    pub used_attribute_flags: u32,
    pub flags: u32,
}

/// Recovers a dense variation index from an absolute variation offset.
pub fn variation_index(variation_offset: u64, container_offset: u64) -> Result<i32> {
    let first = container_offset + VARIATION_ARRAY_OFFSET;
    let relative = variation_offset.checked_sub(first).ok_or_else(|| {
        ArchiveError::malformed(format!(
            "variation offset {variation_offset:#x} precedes the variation array at {first:#x}"
        ))
    })?;
    i32::try_from(relative / VARIATION_STRIDE).map_err(|_| {
        ArchiveError::malformed(format!("variation offset {variation_offset:#x} is out of range"))
    })
}

/// Absolute offset of variation `index` in a container placed at `container_offset`.
pub fn variation_offset(index: i32, container_offset: u64) -> Result<u64> {
    let index = u64::try_from(index)
        .map_err(|_| ArchiveError::malformed(format!("negative variation index {index}")))?;
    Ok(container_offset + VARIATION_ARRAY_OFFSET + index * VARIATION_STRIDE)
}

/// Which index tables a program header names, in stream order.
fn table_order(revision: Revision) -> &'static [Table] {
    match revision {
        Revision::V4 => &[Table::Samplers, Table::UniformBlocks],
        Revision::V7 => &[Table::Samplers, Table::UniformBlocks, Table::StorageBuffers],
        Revision::V8 | Revision::V9 => &[
            Table::Samplers,
            Table::Images,
            Table::UniformBlocks,
            Table::StorageBuffers,
        ],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Samplers,
    Images,
    UniformBlocks,
    StorageBuffers,
}

impl ShaderProgram {
    fn table(&self, table: Table) -> &Vec<StageLocations> {
        match table {
            Table::Samplers => &self.sampler_locations,
            Table::Images => &self.image_locations,
            Table::UniformBlocks => &self.uniform_block_locations,
            Table::StorageBuffers => &self.storage_buffer_locations,
        }
    }

    fn table_mut(&mut self, table: Table) -> &mut Vec<StageLocations> {
        match table {
            Table::Samplers => &mut self.sampler_locations,
            Table::Images => &mut self.image_locations,
            Table::UniformBlocks => &mut self.uniform_block_locations,
            Table::StorageBuffers => &mut self.storage_buffer_locations,
        }
    }

    /// Decodes one program header. The variation index is resolved by the
    /// caller once the bytecode container's offset is known.
    pub(crate) fn decode_record(r: &mut BinaryReader) -> Result<(Self, u64)> {
        let revision = r.revision();
        let order = table_order(revision);

        let mut table_offsets = Vec::with_capacity(order.len());
        for _ in order {
            table_offsets.push(r.read_u64()?);
        }
        let variation_offset = r.read_u64()?;
        let _parent_model = r.read_u64()?;
        let used_attribute_flags = r.read_u32()?;
        let flags = r.read_u32()?;

        let mut counts = Vec::with_capacity(order.len());
        for _ in order {
            counts.push(r.read_u16()? as usize);
        }
        match revision {
            Revision::V4 => r.skip(4)?,
            Revision::V7 => r.skip(2 + 8)?,
            Revision::V8 | Revision::V9 => {}
        }

        let mut program = ShaderProgram {
            used_attribute_flags,
            flags,
            ..Self::default()
        };
        for ((table, offset), n) in order.iter().zip(table_offsets).zip(counts) {
            *program.table_mut(*table) = r.array_at::<StageLocations>(offset, n)?;
        }
        Ok((program, variation_offset))
    }

    /// Writes the fixed header; returns the slots of its index tables.
    pub(crate) fn write_record(
        &self,
        w: &mut BinaryWriter,
        container_offset: u64,
        parent_model: usize,
    ) -> Result<Vec<usize>> {
        let revision = w.revision();
        let order = table_order(revision);

        let slots: Vec<usize> = order.iter().map(|_| w.reserve_offset()).collect();
        w.write_u64(variation_offset(self.variation_index, container_offset)?);
        w.write_u64(parent_model as u64);
        w.write_u32(self.used_attribute_flags);
        w.write_u32(self.flags);
        for table in order {
            w.write_u16(count("index table entries", self.table(*table).len())?);
        }
        match revision {
            Revision::V4 => w.write_zeros(4),
            Revision::V7 => w.write_zeros(2 + 8),
            Revision::V8 | Revision::V9 => {}
        }
        Ok(slots)
    }

    pub(crate) fn write_tables(&self, w: &mut BinaryWriter, slots: Vec<usize>) -> Result<()> {
        for (table, slot) in table_order(w.revision()).iter().zip(slots) {
            w.write_array(slot, self.table(*table))?;
        }
        Ok(())
    }
}
