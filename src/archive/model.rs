// Shader model record: decoding and encoding
//
// A model record is purely positional. Optional fields are consulted from the
// revision's `ModelLayout` in stream order by both the reader and the writer.

use bytes::Bytes;

use super::header::ModelLayout;
use super::program::{variation_index, ShaderProgram};
use super::resources::{
    write_options, write_uniform_blocks, Attribute, ImageBuffer, Sampler, ShaderOption,
    StorageBuffer, SymbolCounts, SymbolTable, UniformBlock,
};
use crate::bytecode::{BytecodeContainer, ShaderCode, ShaderStage};
use crate::error::{ArchiveError, Result};
use crate::io::writer::count;
use crate::io::{BinaryReader, BinaryWriter, Decode, DictSlots, ResDict};

const BYTECODE_CONTAINER_ALIGNMENT: usize = 0x1000;

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderModel {
    pub name: String,
    pub static_options: ResDict<ShaderOption>,
    pub dynamic_options: ResDict<ShaderOption>,
    pub attributes: ResDict<Attribute>,
    pub samplers: ResDict<Sampler>,
    /// Major 8 and later.
    pub images: ResDict<ImageBuffer>,
    pub uniform_blocks: ResDict<UniformBlock>,
    /// Major 7 and later.
    pub storage_buffers: ResDict<StorageBuffer>,
    pub symbols: Option<SymbolTable>,
    pub bytecode: BytecodeContainer,
    pub programs: Vec<ShaderProgram>,
    /// `programs.len() * (static_key_length + dynamic_key_length)` words.
    pub key_table: Vec<i32>,
    pub default_program_index: i32,
    pub static_key_length: u8,
    pub dynamic_key_length: u8,
    pub unknown2: u8,
    pub unknown_indices: [u8; 4],
    /// Trailing bytes whose length depends on the revision.
    pub tail: Vec<u8>,
}

impl Decode for ShaderModel {
    fn decode(r: &mut BinaryReader) -> Result<Self> {
        let layout = r.revision().model_layout();

        let name = r.load_string()?;
        let static_options = r.load_dict::<ShaderOption>()?;
        let dynamic_options = r.load_dict::<ShaderOption>()?;
        let attributes = r.load_dict::<Attribute>()?;
        let samplers = r.load_dict::<Sampler>()?;
        let images = if layout.images {
            r.load_dict::<ImageBuffer>()?
        } else {
            ResDict::new()
        };
        let uniform_blocks = r.load_dict::<UniformBlock>()?;
        let _uniform_array = r.read_u64()?;
        let storage_buffers = if layout.storage_buffers {
            let buffers = r.load_dict::<StorageBuffer>()?;
            r.read_u64()?;
            buffers
        } else {
            ResDict::new()
        };

        let programs_offset = r.read_u64()?;
        let key_table_offset = r.read_u64()?;
        let _archive_offset = r.read_u64()?;
        let symbols_offset = r.read_u64()?;
        let bytecode_offset = r.read_u64()?;
        for _ in 0..3 + layout.padding_words {
            r.read_u64()?;
        }

        let _uniform_count = r.read_u32()?;
        if layout.storage_count {
            r.read_u32()?;
        }
        let default_program_index = r.read_i32()?;
        let static_option_count = r.read_u16()? as usize;
        let dynamic_option_count = r.read_u16()? as usize;
        let program_count = r.read_u16()? as usize;
        if layout.program_count_pad {
            r.read_u16()?;
        }
        let static_key_length = r.read_u8()?;
        let dynamic_key_length = r.read_u8()?;
        let attribute_count = r.read_u8()? as usize;
        let sampler_count = r.read_u8()? as usize;
        let image_count = if layout.image_count {
            r.read_u8()? as usize
        } else {
            0
        };
        let uniform_block_count = r.read_u8()? as usize;
        let unknown2 = r.read_u8()?;
        let unknown_indices = r.read_array::<4>()?;
        let tail = r.read_slice(layout.tail_len)?.to_vec();

        for (what, declared, actual) in [
            ("static options", static_option_count, static_options.len()),
            ("dynamic options", dynamic_option_count, dynamic_options.len()),
            ("attributes", attribute_count, attributes.len()),
            ("samplers", sampler_count, samplers.len()),
            ("images", image_count, images.len()),
            ("uniform blocks", uniform_block_count, uniform_blocks.len()),
        ] {
            if declared != actual {
                return Err(ArchiveError::malformed(format!(
                    "model '{name}' declares {declared} {what} but its dictionary has {actual}"
                )));
            }
        }

        // Offset-indirected loads, in this order for every revision.
        let bytecode = BytecodeContainer::read_at(r, bytecode_offset)?;
        let records = r.at(programs_offset, |r| {
            (0..program_count)
                .map(|_| ShaderProgram::decode_record(r))
                .collect::<Result<Vec<_>>>()
        })?;
        let keys = (static_key_length as usize + dynamic_key_length as usize) * program_count;
        let key_table = if keys == 0 {
            Vec::new()
        } else {
            r.at(key_table_offset, |r| r.read_i32s(keys))?
        };
        let symbols = if symbols_offset != 0 {
            let counts = SymbolCounts {
                samplers: samplers.len(),
                images: images.len(),
                uniform_blocks: uniform_blocks.len(),
                storage_buffers: storage_buffers.len(),
            };
            Some(r.at(symbols_offset, |r| SymbolTable::decode(r, &counts))?)
        } else {
            None
        };
        let programs = records
            .into_iter()
            .map(|(mut program, offset)| {
                program.variation_index = variation_index(offset, bytecode_offset)?;
                Ok(program)
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "model '{}': {} static / {} dynamic options, {} programs",
            name,
            static_options.len(),
            dynamic_options.len(),
            programs.len()
        );

        Ok(ShaderModel {
            name,
            static_options,
            dynamic_options,
            attributes,
            samplers,
            images,
            uniform_blocks,
            storage_buffers,
            symbols,
            bytecode,
            programs,
            key_table,
            default_program_index,
            static_key_length,
            dynamic_key_length,
            unknown2,
            unknown_indices,
            tail,
        })
    }
}

impl ShaderModel {
    pub fn keys_per_program(&self) -> usize {
        self.static_key_length as usize + self.dynamic_key_length as usize
    }

    /// Stage code of a program, found through its variation index.
    pub fn program_code(&self, program: usize, stage: ShaderStage) -> Result<&ShaderCode> {
        let variation_index = self.program(program)?.variation_index;
        self.bytecode
            .variation(variation_index)
            .and_then(|v| v.program.as_ref())
            .and_then(|p| p.get(stage))
            .ok_or_else(|| {
                ArchiveError::missing(format!(
                    "model '{}' program {program} has no {stage:?} code",
                    self.name
                ))
            })
    }

    /// Replaces a program's stage code. Programs sharing the variation see
    /// the new code too.
    pub fn replace_program_code(
        &mut self,
        program: usize,
        stage: ShaderStage,
        bytecode: Bytes,
        control: Bytes,
    ) -> Result<()> {
        let variation_index = self.program(program)?.variation_index;
        let name = &self.name;
        let variation = self
            .bytecode
            .variation_mut(variation_index)
            .ok_or_else(|| {
                ArchiveError::missing(format!(
                    "model '{name}' has no variation {variation_index}"
                ))
            })?;
        variation
            .program
            .get_or_insert_with(Default::default)
            .set(stage, ShaderCode { control, bytecode });
        Ok(())
    }

    fn program(&self, index: usize) -> Result<&ShaderProgram> {
        self.programs.get(index).ok_or_else(|| {
            ArchiveError::missing(format!(
                "model '{}' has {} programs, no program {index}",
                self.name,
                self.programs.len()
            ))
        })
    }
}

/// Slots of a model record that point at out-of-line blocks.
pub(crate) struct ModelSlots {
    record: usize,
    static_options: DictSlots,
    dynamic_options: DictSlots,
    attributes: DictSlots,
    samplers: DictSlots,
    images: Option<DictSlots>,
    uniform_blocks: DictSlots,
    storage_buffers: Option<DictSlots>,
    programs: usize,
    key_table: usize,
    archive: usize,
    symbols: usize,
    bytecode: usize,
}

impl ShaderModel {
    pub(crate) fn write_record(&self, w: &mut BinaryWriter) -> Result<ModelSlots> {
        let layout: &ModelLayout = w.revision().model_layout();
        let expected_keys = self.programs.len() * self.keys_per_program();
        if self.key_table.len() != expected_keys {
            return Err(ArchiveError::malformed(format!(
                "model '{}' has {} key words, expected {expected_keys}",
                self.name,
                self.key_table.len()
            )));
        }

        let record = w.position();
        w.write_string(&self.name);
        let static_options = w.reserve_dict();
        let dynamic_options = w.reserve_dict();
        let attributes = w.reserve_dict();
        let samplers = w.reserve_dict();
        let images = layout.images.then(|| w.reserve_dict());
        let uniform_blocks = w.reserve_dict();
        w.write_u64(0);
        let storage_buffers = layout.storage_buffers.then(|| {
            let slots = w.reserve_dict();
            w.write_u64(0);
            slots
        });

        let programs = w.reserve_offset();
        let key_table = w.reserve_offset();
        let archive = w.reserve_offset();
        let symbols = w.reserve_offset();
        let bytecode = w.reserve_offset();
        w.write_zeros(8 * (3 + layout.padding_words));

        let uniform_count: usize = self.uniform_blocks.values().map(|b| b.uniforms.len()).sum();
        w.write_u32(count("uniforms", uniform_count)?);
        if layout.storage_count {
            w.write_u32(count("storage buffers", self.storage_buffers.len())?);
        }
        w.write_i32(self.default_program_index);
        w.write_u16(count("static options", self.static_options.len())?);
        w.write_u16(count("dynamic options", self.dynamic_options.len())?);
        w.write_u16(count("programs", self.programs.len())?);
        if layout.program_count_pad {
            w.write_u16(0);
        }
        w.write_u8(self.static_key_length);
        w.write_u8(self.dynamic_key_length);
        w.write_u8(count("attributes", self.attributes.len())?);
        w.write_u8(count("samplers", self.samplers.len())?);
        if layout.image_count {
            w.write_u8(count("images", self.images.len())?);
        }
        w.write_u8(count("uniform blocks", self.uniform_blocks.len())?);
        w.write_u8(self.unknown2);
        w.write_bytes(&self.unknown_indices);
        let mut tail = self.tail.clone();
        tail.resize(layout.tail_len, 0);
        w.write_bytes(&tail);

        Ok(ModelSlots {
            record,
            static_options,
            dynamic_options,
            attributes,
            samplers,
            images,
            uniform_blocks,
            storage_buffers,
            programs,
            key_table,
            archive,
            symbols,
            bytecode,
        })
    }

    pub(crate) fn write_blocks(&self, w: &mut BinaryWriter, slots: ModelSlots) -> Result<()> {
        write_options(w, slots.static_options, &self.static_options)?;
        write_options(w, slots.dynamic_options, &self.dynamic_options)?;
        w.write_dict(slots.attributes, &self.attributes)?;
        w.write_dict(slots.samplers, &self.samplers)?;
        if let Some(images) = slots.images {
            w.write_dict(images, &self.images)?;
        }
        write_uniform_blocks(w, slots.uniform_blocks, &self.uniform_blocks)?;
        if let Some(storage) = slots.storage_buffers {
            w.write_dict(storage, &self.storage_buffers)?;
        }

        let container = self.bytecode.to_bytes()?;
        w.align(BYTECODE_CONTAINER_ALIGNMENT);
        let container_offset = w.position();
        w.patch_offset(slots.archive, container_offset);
        w.patch_offset(slots.bytecode, container_offset);
        w.write_bytes(&container);

        if !self.programs.is_empty() {
            w.place(slots.programs);
            let mut pending = Vec::with_capacity(self.programs.len());
            for program in &self.programs {
                pending.push(program.write_record(w, container_offset as u64, slots.record)?);
            }
            for (program, tables) in self.programs.iter().zip(pending) {
                program.write_tables(w, tables)?;
            }
        }

        if !self.key_table.is_empty() {
            w.place(slots.key_table);
            for word in &self.key_table {
                w.write_i32(*word);
            }
        }

        if let Some(symbols) = &self.symbols {
            w.place(slots.symbols);
            symbols.write(w)?;
        }
        Ok(())
    }
}
