// Shared binary header and per-version layout tables
//
// The 32-byte header prefixes both the shader archive and its embedded
// bytecode container. Its major version picks one of four model layouts.

use crate::error::{ArchiveError, Result};

pub const HEADER_LEN: usize = 0x20;

/// Offset of the file-size field inside the header.
pub const FILE_SIZE_OFFSET: usize = 0x1C;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u8,
    pub micro: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryHeader {
    pub magic: [u8; 8],
    pub version: Version,
    pub byte_order: u16,
    pub alignment: u8,
    pub target_address_size: u8,
    pub name_offset: u32,
    pub flags: u16,
    pub block_offset: u16,
    pub relocation_table_offset: u32,
    pub file_size: u32,
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

impl BinaryHeader {
    pub fn new(magic: [u8; 8], version: Version) -> Self {
        Self {
            magic,
            version,
            byte_order: 0xFEFF,
            alignment: 0x0C,
            target_address_size: 64,
            name_offset: 0,
            flags: 0,
            block_offset: 0,
            relocation_table_offset: 0,
            file_size: 0,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ArchiveError::malformed(format!(
                "need at least {HEADER_LEN} header bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            magic: field(bytes, 0),
            version: Version {
                micro: bytes[8],
                minor: bytes[9],
                major: u16::from_le_bytes(field(bytes, 10)),
            },
            byte_order: u16::from_le_bytes(field(bytes, 12)),
            alignment: bytes[14],
            target_address_size: bytes[15],
            name_offset: u32::from_le_bytes(field(bytes, 16)),
            flags: u16::from_le_bytes(field(bytes, 20)),
            block_offset: u16::from_le_bytes(field(bytes, 22)),
            relocation_table_offset: u32::from_le_bytes(field(bytes, 24)),
            file_size: u32::from_le_bytes(field(bytes, FILE_SIZE_OFFSET)),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..8].copy_from_slice(&self.magic);
        out[8] = self.version.micro;
        out[9] = self.version.minor;
        out[10..12].copy_from_slice(&self.version.major.to_le_bytes());
        out[12..14].copy_from_slice(&self.byte_order.to_le_bytes());
        out[14] = self.alignment;
        out[15] = self.target_address_size;
        out[16..20].copy_from_slice(&self.name_offset.to_le_bytes());
        out[20..22].copy_from_slice(&self.flags.to_le_bytes());
        out[22..24].copy_from_slice(&self.block_offset.to_le_bytes());
        out[24..28].copy_from_slice(&self.relocation_table_offset.to_le_bytes());
        out[FILE_SIZE_OFFSET..].copy_from_slice(&self.file_size.to_le_bytes());
        out
    }
}

/// Layout revision bucket selected by the header's major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Revision {
    /// Majors 4 through 6.
    V4,
    V7,
    V8,
    /// Major 9: two-stage location tables and the reordered option record.
    V9,
}

impl Revision {
    pub fn for_version(version: Version) -> Result<Self> {
        match version.major {
            4..=6 => Ok(Revision::V4),
            7 => Ok(Revision::V7),
            8 => Ok(Revision::V8),
            9 => Ok(Revision::V9),
            major => Err(ArchiveError::UnsupportedVersion { major }),
        }
    }

    pub fn model_layout(self) -> &'static ModelLayout {
        match self {
            Revision::V4 => &MODEL_LAYOUT_V4,
            Revision::V7 => &MODEL_LAYOUT_V7,
            Revision::V8 | Revision::V9 => &MODEL_LAYOUT_V8,
        }
    }

    /// The archive preamble carries an extra u64 of padding from major 7.
    pub fn has_preamble_padding(self) -> bool {
        self >= Revision::V7
    }

    /// Only vertex and fragment locations are stored from major 9.
    pub fn has_two_stage_locations(self) -> bool {
        self >= Revision::V9
    }
}

/// Which optional fields a model record carries, consulted in stream order.
#[derive(Debug)]
pub struct ModelLayout {
    /// Image dictionary after the samplers.
    pub images: bool,
    /// Storage-buffer dictionary and one reserved u64 after the uniform array offset.
    pub storage_buffers: bool,
    /// Zero u64 words after the three reserved ones.
    pub padding_words: usize,
    /// u32 storage count after the uniform count.
    pub storage_count: bool,
    /// u16 reserved after the program count.
    pub program_count_pad: bool,
    /// u8 image count after the sampler count.
    pub image_count: bool,
    /// Bytes after the four unknown indices.
    pub tail_len: usize,
}

pub const MODEL_LAYOUT_V4: ModelLayout = ModelLayout {
    images: false,
    storage_buffers: false,
    padding_words: 0,
    storage_count: false,
    program_count_pad: true,
    image_count: false,
    tail_len: 6,
};

pub const MODEL_LAYOUT_V7: ModelLayout = ModelLayout {
    images: false,
    storage_buffers: true,
    padding_words: 2,
    storage_count: true,
    program_count_pad: false,
    image_count: false,
    tail_len: 4,
};

pub const MODEL_LAYOUT_V8: ModelLayout = ModelLayout {
    images: true,
    storage_buffers: true,
    padding_words: 2,
    storage_count: true,
    program_count_pad: false,
    image_count: true,
    tail_len: 11,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn version(major: u16) -> Version {
        Version {
            major,
            minor: 1,
            micro: 0,
        }
    }

    #[test]
    fn header_bytes_round_trip() {
        let mut header = BinaryHeader::new(*b"FSHA    ", version(8));
        header.file_size = 0x1234;
        header.flags = 3;
        let bytes = header.to_bytes();
        assert_eq!(&bytes[4..8], &[0x20; 4]);
        assert_eq!(u32::from_le_bytes(bytes[0x1C..0x20].try_into().unwrap()), 0x1234);
        assert_eq!(BinaryHeader::parse(&bytes).unwrap(), header);
    }

    #[test]
    fn version_buckets() {
        assert_eq!(Revision::for_version(version(4)).unwrap(), Revision::V4);
        assert_eq!(Revision::for_version(version(6)).unwrap(), Revision::V4);
        assert_eq!(Revision::for_version(version(7)).unwrap(), Revision::V7);
        assert_eq!(Revision::for_version(version(8)).unwrap(), Revision::V8);
        assert_eq!(Revision::for_version(version(9)).unwrap(), Revision::V9);
        assert!(matches!(
            Revision::for_version(version(3)),
            Err(ArchiveError::UnsupportedVersion { major: 3 })
        ));
        assert!(Revision::for_version(version(10)).is_err());
    }

    #[test]
    fn tail_lengths_follow_revision() {
        assert_eq!(Revision::V4.model_layout().tail_len, 6);
        assert_eq!(Revision::V7.model_layout().tail_len, 4);
        assert_eq!(Revision::V9.model_layout().tail_len, 11);
    }

    #[test]
    fn short_header_is_malformed() {
        assert!(BinaryHeader::parse(&[0u8; 16]).is_err());
    }
}
