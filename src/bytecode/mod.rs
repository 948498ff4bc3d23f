// Embedded bytecode container
//
// Each shader model embeds a self-contained `BNSH` sub-archive holding, per
// program variation, the machine bytecode and control record of every stage.
// Its extent comes from the file-size field of its own header; every offset
// inside it is relative to its own start, not to the parent archive.

pub mod control;

use bytes::Bytes;
use serde::Deserialize;

use crate::archive::header::{BinaryHeader, Version, FILE_SIZE_OFFSET, HEADER_LEN};
use crate::error::{ArchiveError, Result};
use crate::io::{BinaryReader, BinaryWriter};

pub use control::{ConstantTable, ControlRecord, NvnControl};

pub const CONTAINER_MAGIC: [u8; 8] = *b"BNSH\0\0\0\0";
const BLOCK_MAGIC: [u8; 4] = *b"grsc";

/// Relative offset of the first variation record.
pub const VARIATION_ARRAY_OFFSET: u64 = 192;
/// Size of one variation record.
pub const VARIATION_STRIDE: u64 = 64;

const PROGRAM_RECORD_LEN: usize = 64;
const CODE_RECORD_LEN: usize = 32;
const BYTECODE_ALIGNMENT: usize = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 6] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEvaluation,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Stage token understood by the external compiler's `-s` flag.
    pub fn compiler_token(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::TessControl => "tess_ctrl",
            ShaderStage::TessEvaluation => "tess_eval",
            ShaderStage::Geometry => "geom",
            ShaderStage::Fragment => "frag",
            ShaderStage::Compute => "comp",
        }
    }
}

/// Machine bytecode and control record of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderCode {
    pub control: Bytes,
    pub bytecode: Bytes,
}

/// Per-stage code of one program variation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StagePrograms {
    pub stages: [Option<ShaderCode>; 6],
}

impl StagePrograms {
    pub fn get(&self, stage: ShaderStage) -> Option<&ShaderCode> {
        self.stages[stage.index()].as_ref()
    }

    pub fn set(&mut self, stage: ShaderStage, code: ShaderCode) {
        self.stages[stage.index()] = Some(code);
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variation {
    pub program: Option<StagePrograms>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeContainer {
    pub header: BinaryHeader,
    pub code_target: u16,
    pub compiler_version: u16,
    pub variations: Vec<Variation>,
}

impl BytecodeContainer {
    pub fn new(version: Version) -> Self {
        Self {
            header: BinaryHeader::new(CONTAINER_MAGIC, version),
            code_target: 0,
            compiler_version: 0,
            variations: Vec::new(),
        }
    }

    /// Bounds the container that starts at absolute `start` in the parent.
    ///
    /// Peeks the length at `start + 0x1C`; the parent's position is untouched.
    pub fn locate(parent: &mut BinaryReader, start: u64) -> Result<Bytes> {
        let length_at = start
            .checked_add(FILE_SIZE_OFFSET as u64)
            .ok_or_else(|| ArchiveError::malformed("bytecode container offset overflows"))?;
        let length = parent.at(length_at, |r| r.read_u32())?;
        if (length as usize) < HEADER_LEN {
            return Err(ArchiveError::malformed(format!(
                "bytecode container at {start:#x} declares {length} bytes"
            )));
        }
        parent.sub_range(start, u64::from(length))
    }

    /// Locates and decodes the container at absolute `start` in the parent.
    pub fn read_at(parent: &mut BinaryReader, start: u64) -> Result<Self> {
        let data = Self::locate(parent, start)?;
        Self::parse(BinaryReader::new(data, parent.revision()))
    }

    /// Decodes a container whose offsets are relative to the reader's start.
    pub fn parse(mut r: BinaryReader) -> Result<Self> {
        let header = r.at(0, |r| {
            let raw = r.read_slice(HEADER_LEN)?;
            BinaryHeader::parse(&raw)
        })?;
        if header.magic != CONTAINER_MAGIC {
            return Err(ArchiveError::malformed(format!(
                "bytecode container magic {:02x?}",
                header.magic
            )));
        }

        r.seek(HEADER_LEN as u64)?;
        let block = r.read_array::<4>()?;
        if block != BLOCK_MAGIC {
            return Err(ArchiveError::malformed(format!(
                "expected grsc block in bytecode container, found {block:02x?}"
            )));
        }
        r.skip(12)?;
        let variations_offset = r.read_u64()?;
        let variation_count = r.read_u32()? as usize;
        let code_target = r.read_u16()?;
        let compiler_version = r.read_u16()?;

        let mut variations = Vec::new();
        for i in 0..variation_count as u64 {
            let record = (i * VARIATION_STRIDE)
                .checked_add(variations_offset)
                .ok_or_else(|| ArchiveError::malformed("variation record offset overflows"))?;
            let program_offset = r.at(record.saturating_add(16), |r| r.read_u64())?;
            let program = if program_offset == 0 {
                None
            } else {
                Some(r.at(program_offset, Self::read_program)?)
            };
            variations.push(Variation { program });
        }

        Ok(Self {
            header,
            code_target,
            compiler_version,
            variations,
        })
    }

    fn read_program(r: &mut BinaryReader) -> Result<StagePrograms> {
        let mut program = StagePrograms::default();
        for slot in program.stages.iter_mut() {
            let code_offset = r.read_u64()?;
            if code_offset == 0 {
                continue;
            }
            *slot = Some(r.at(code_offset, |r| {
                let control_offset = r.read_u64()?;
                let bytecode_offset = r.read_u64()?;
                let control_len = r.read_u32()?;
                let bytecode_len = r.read_u32()?;
                Ok(ShaderCode {
                    control: r.sub_range(control_offset, u64::from(control_len))?,
                    bytecode: r.sub_range(bytecode_offset, u64::from(bytecode_len))?,
                })
            })?);
        }
        Ok(program)
    }

    pub fn variation(&self, index: i32) -> Option<&Variation> {
        usize::try_from(index).ok().and_then(|i| self.variations.get(i))
    }

    pub fn variation_mut(&mut self, index: i32) -> Option<&mut Variation> {
        usize::try_from(index)
            .ok()
            .and_then(move |i| self.variations.get_mut(i))
    }

    /// Serializes the container with offsets relative to its own start.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        // No field of the container is revision-gated, so any revision writes the same bytes.
        let mut w = BinaryWriter::new(crate::archive::header::Revision::V9);
        w.write_zeros(HEADER_LEN);

        w.write_bytes(&BLOCK_MAGIC);
        w.write_u32(0);
        let block_size_at = w.position();
        w.write_u32(0);
        w.write_u32(0);
        w.write_u64(VARIATION_ARRAY_OFFSET);
        w.write_u32(u32::try_from(self.variations.len()).map_err(|_| {
            ArchiveError::malformed("too many variations in bytecode container")
        })?);
        w.write_u16(self.code_target);
        w.write_u16(self.compiler_version);
        let preamble = w.position();
        w.write_zeros(VARIATION_ARRAY_OFFSET as usize - preamble);

        let mut program_slots = Vec::with_capacity(self.variations.len());
        for variation in &self.variations {
            w.write_u64(0);
            w.write_u64(0);
            let slot = w.reserve_offset();
            w.write_u64(0);
            w.write_zeros(32);
            program_slots.push(variation.program.as_ref().map(|p| (slot, p)));
        }

        let mut code_slots = Vec::new();
        for (slot, program) in program_slots.into_iter().flatten() {
            w.place(slot);
            let record_start = w.position();
            for code in &program.stages {
                let code_slot = w.reserve_offset();
                if let Some(code) = code {
                    code_slots.push((code_slot, code));
                }
            }
            let written = w.position() - record_start;
            w.write_zeros(PROGRAM_RECORD_LEN - written);
        }

        let mut blob_slots = Vec::with_capacity(code_slots.len());
        for (slot, code) in code_slots {
            w.place(slot);
            let control_slot = w.reserve_offset();
            let bytecode_slot = w.reserve_offset();
            w.write_u32(blob_len(&code.control)?);
            w.write_u32(blob_len(&code.bytecode)?);
            w.write_zeros(CODE_RECORD_LEN - 24);
            blob_slots.push((control_slot, bytecode_slot, code));
        }

        for (control_slot, bytecode_slot, code) in blob_slots {
            w.place(control_slot);
            w.write_bytes(&code.control);
            w.align(BYTECODE_ALIGNMENT);
            let at = w.position();
            w.patch_offset(bytecode_slot, at);
            w.write_bytes(&code.bytecode);
        }
        w.align(8);

        let total = w.position();
        let mut header = self.header.clone();
        header.file_size = u32::try_from(total)
            .map_err(|_| ArchiveError::malformed("bytecode container exceeds 4 GiB"))?;
        w.patch_bytes(0, &header.to_bytes());
        w.patch_bytes(block_size_at, &((total - HEADER_LEN) as u32).to_le_bytes());
        Ok(w.into_inner())
    }
}

fn blob_len(bytes: &[u8]) -> Result<u32> {
    u32::try_from(bytes.len()).map_err(|_| ArchiveError::malformed("blob exceeds 4 GiB"))
}
