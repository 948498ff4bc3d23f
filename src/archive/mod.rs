// Shader archive container
//
// Version dispatch happens here: the legacy platform is recognised by the
// word following the magic, the shared header picks the layout revision, and
// the revision is threaded through every model decoder.

pub mod header;
pub mod key_table;
pub mod model;
pub mod program;
pub mod resources;

use std::path::Path;

use anyhow::Context;
use bytes::Bytes;

use crate::error::{ArchiveError, Result};
use crate::io::{BinaryReader, BinaryWriter, ResDict};

pub use header::{BinaryHeader, Revision, Version};
pub use key_table::OptionKind;
pub use model::ShaderModel;
pub use program::{ShaderProgram, StageLocations};
pub use resources::{
    Attribute, ImageBuffer, Sampler, ShaderOption, ShaderUniform, StorageBuffer, SymbolEntry,
    SymbolTable, UniformBlock,
};

pub const ARCHIVE_MAGIC: [u8; 8] = *b"FSHA    ";

/// Offset of the word that distinguishes current archives from legacy ones.
pub const PLATFORM_SENTINEL_OFFSET: usize = 4;
pub const PLATFORM_SENTINEL: u32 = 0x2020_2020;

#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub header: BinaryHeader,
    pub name: String,
    pub path: String,
    pub models: ResDict<ShaderModel>,
    pub flags: u16,
}

/// True when `data` is a legacy-platform archive.
pub fn is_legacy_platform(data: &[u8]) -> Result<bool> {
    let end = PLATFORM_SENTINEL_OFFSET + 4;
    let word = data.get(PLATFORM_SENTINEL_OFFSET..end).ok_or_else(|| {
        ArchiveError::malformed(format!("need {end} bytes to probe the platform, got {}", data.len()))
    })?;
    Ok(u32::from_le_bytes([word[0], word[1], word[2], word[3]]) != PLATFORM_SENTINEL)
}

impl Container {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            header: BinaryHeader::new(ARCHIVE_MAGIC, version),
            name: name.into(),
            path: String::new(),
            models: ResDict::new(),
            flags: 0,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read shader archive: {:?}", path))?;
        Self::from_bytes(data).with_context(|| format!("Failed to decode shader archive: {:?}", path))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        if is_legacy_platform(&data)? {
            log::warn!("Legacy platform archive detected; not decoded");
            return Err(ArchiveError::LegacyPlatform);
        }

        let header = BinaryHeader::parse(&data)?;
        let revision = Revision::for_version(header.version)?;
        let mut r = BinaryReader::new(data, revision);
        r.seek(header::HEADER_LEN as u64)?;

        r.read_u64()?;
        r.read_u64()?;
        let _string_pool = r.read_u64()?;
        let _model_table = r.read_u64()?;
        let name = r.load_string()?;
        let path = r.load_string()?;
        let models = r.load_dict::<ShaderModel>()?;
        for _ in 0..4 {
            r.read_u32()?;
        }
        r.read_u64()?;
        if revision.has_preamble_padding() {
            r.read_u64()?;
        }
        let model_count = r.read_u16()? as usize;
        let flags = r.read_u16()?;
        r.read_u16()?;

        if model_count != models.len() {
            return Err(ArchiveError::malformed(format!(
                "archive declares {model_count} models but its dictionary has {}",
                models.len()
            )));
        }

        log::info!(
            "Decoded shader archive '{}' v{}.{}.{} with {} models",
            name,
            header.version.major,
            header.version.minor,
            header.version.micro,
            models.len()
        );

        Ok(Self {
            header,
            name,
            path,
            models,
            flags,
        })
    }

    pub fn revision(&self) -> Result<Revision> {
        Revision::for_version(self.header.version)
    }

    pub fn model(&self, name: &str) -> Result<&ShaderModel> {
        self.models
            .get(name)
            .ok_or_else(|| ArchiveError::missing(format!("no shader model named '{name}'")))
    }

    pub fn model_mut(&mut self, name: &str) -> Result<&mut ShaderModel> {
        self.models
            .get_mut(name)
            .ok_or_else(|| ArchiveError::missing(format!("no shader model named '{name}'")))
    }

    /// Serializes the archive with the same layout revision it was read with.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let revision = self.revision()?;
        let mut w = BinaryWriter::new(revision);
        w.write_zeros(header::HEADER_LEN);

        w.write_u64(0);
        w.write_u64(0);
        let string_pool = w.reserve_offset();
        let model_table = w.reserve_offset();
        w.write_string(&self.name);
        w.write_string(&self.path);
        let models = w.reserve_dict();
        w.write_zeros(4 * 4 + 8);
        if revision.has_preamble_padding() {
            w.write_u64(0);
        }
        w.write_u16(crate::io::writer::count("models", self.models.len())?);
        w.write_u16(self.flags);
        w.write_u16(0);

        if !self.models.is_empty() {
            w.write_dict_keys(models.dict, self.models.keys())?;
            let table = w.place(models.values);
            w.patch_offset(model_table, table);
            let mut pending = Vec::with_capacity(self.models.len());
            for model in self.models.values() {
                pending.push(model.write_record(&mut w)?);
            }
            for (model, slots) in self.models.values().zip(pending) {
                model.write_blocks(&mut w, slots)?;
            }
        }

        let pool = w.finish_strings()?;
        w.patch_offset(string_pool, pool);
        w.align(8);

        let mut header = self.header.clone();
        header.file_size = u32::try_from(w.position())
            .map_err(|_| ArchiveError::malformed("archive exceeds 4 GiB"))?;
        w.patch_bytes(0, &header.to_bytes());

        let bytes = w.into_inner();
        log::debug!("Encoded shader archive '{}' ({} bytes)", self.name, bytes.len());
        Ok(bytes)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write shader archive: {:?}", path))?;
        log::info!("Wrote {} bytes to {:?}", bytes.len(), path);
        Ok(())
    }
}
