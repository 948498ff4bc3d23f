// Compiler output header rewrite
//
// Raw compiler output starts with a 304-byte vendor header. The archive wants
// a 48-byte header instead: magic word, zeros, and a stage tag at byte 51.

use crate::error::RecompileFailure;

pub const RAW_HEADER_LEN: usize = 304;
pub const BYTECODE_HEADER_LEN: usize = 48;
pub const BYTECODE_MAGIC: u32 = 0x1234_5678;

const STAGE_TAG_OFFSET: usize = 51;
const STAGE_TAG: u8 = 2;

/// Strips the vendor header from `raw` and prepends the archive header.
pub fn fix_header(raw: &[u8]) -> Result<Vec<u8>, RecompileFailure> {
    let body = raw
        .get(RAW_HEADER_LEN..)
        .ok_or(RecompileFailure::TruncatedOutput {
            len: raw.len(),
            header: RAW_HEADER_LEN,
        })?;

    let mut out = Vec::with_capacity(BYTECODE_HEADER_LEN + body.len());
    out.extend_from_slice(&BYTECODE_MAGIC.to_le_bytes());
    out.resize(BYTECODE_HEADER_LEN, 0);
    out.extend_from_slice(body);
    if out.len() <= STAGE_TAG_OFFSET {
        out.resize(STAGE_TAG_OFFSET + 1, 0);
    }
    out[STAGE_TAG_OFFSET] = STAGE_TAG;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swaps_vendor_header() {
        let mut raw = vec![0xEEu8; RAW_HEADER_LEN];
        raw.extend((0u8..16).collect::<Vec<_>>());
        let out = fix_header(&raw).unwrap();
        assert_eq!(out.len(), BYTECODE_HEADER_LEN + 16);
        assert_eq!(&out[..4], &[0x78, 0x56, 0x34, 0x12]);
        assert!(out[4..BYTECODE_HEADER_LEN].iter().all(|&b| b == 0));
        assert_eq!(&out[48..51], &[0, 1, 2]);
        assert_eq!(out[51], 2);
        assert_eq!(&out[52..], &(4u8..16).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn short_body_is_extended_to_the_tag() {
        let out = fix_header(&[0u8; RAW_HEADER_LEN]).unwrap();
        assert_eq!(out.len(), 52);
        assert_eq!(out[51], 2);
    }

    #[test]
    fn output_shorter_than_vendor_header() {
        assert!(matches!(
            fix_header(&[0u8; 100]),
            Err(RecompileFailure::TruncatedOutput { len: 100, header: 304 })
        ));
    }
}
