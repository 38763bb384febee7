//! CAB archive walker.
//!
//! Signing a cabinet inserts a 24-byte reserve area after the fixed header,
//! so every post-header offset (cabinet size, files offset, folder data
//! offsets) is rewritten +24 before it reaches the digest and the output.

use std::io::Write;

use crate::error::{SignError, SignResult};
use crate::format::{get_u16_le, get_u32_le};
use crate::sink::HashingSink;

/// Offset of the signature-length slot inside the reserve header.
pub const SIGNATURE_LEN_OFFSET: usize = 0x30;

/// Growth of the header once the reserve area is present.
pub const RESERVE_GROWTH: u32 = 24;

/// Reserve header template. Bytes 8..12 receive the adjusted cabinet size;
/// bytes 12..16 are the signature-length slot patched by the injector.
const CABSIGNED: [u8; 24] = [
    0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0xde, 0xad, 0xbe, 0xef, 0xde, 0xad, 0xbe,
    0xef, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Debug, Clone, Copy)]
pub struct CabContext {
    pub cab_size: u32,
    pub offset_of_files: u32,
    pub num_folders: u16,
}

impl CabContext {
    pub fn parse(data: &[u8]) -> SignResult<Self> {
        if data.len() < 44 {
            return Err(SignError::FileTooShort);
        }
        if data[0x1e] != 0 || data[0x1f] != 0 {
            return Err(SignError::CabFlagsUnsupported);
        }
        let num_folders = get_u16_le(data, 26);
        if data.len() < 36 + 8 * num_folders as usize {
            return Err(SignError::FileTooShort);
        }
        Ok(CabContext {
            cab_size: get_u32_le(data, 8),
            offset_of_files: get_u32_le(data, 16),
            num_folders,
        })
    }
}

/// Stream the cabinet through the sink, rewriting it with the reserve area
/// in place and hashing the normalized byte sequence.
pub fn stream_image<W: Write>(
    sink: &mut HashingSink<W>,
    data: &[u8],
    ctx: &CabContext,
) -> SignResult<()> {
    sink.write(&data[0..4])?;
    sink.forward(&data[4..8])?;

    let new_size = ctx.cab_size.wrapping_add(RESERVE_GROWTH);
    sink.write(&new_size.to_le_bytes())?;

    sink.write(&data[12..16])?;

    let new_files_offset = ctx.offset_of_files.wrapping_add(RESERVE_GROWTH);
    sink.write(&new_files_offset.to_le_bytes())?;

    let mut header_tail = [0u8; 14];
    header_tail.copy_from_slice(&data[20..34]);
    header_tail[10] = 0x04; // RESERVE_PRESENT
    sink.write(&header_tail)?;

    sink.forward(&data[34..36])?;

    let mut reserve = CABSIGNED;
    reserve[8..12].copy_from_slice(&new_size.to_le_bytes());
    sink.forward(&reserve[..20])?;
    sink.write(&reserve[20..24])?;

    let mut i = 36usize;
    for _ in 0..ctx.num_folders {
        let folder_offset = get_u32_le(data, i).wrapping_add(RESERVE_GROWTH);
        sink.write(&folder_offset.to_le_bytes())?;
        sink.write(&data[i + 4..i + 8])?;
        i += 8;
    }

    sink.write(&data[i..])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::put_u32_le;
    use crate::DigestAlgorithm;

    /// Minimal empty cabinet: header only, no folders, files offset 44.
    pub(crate) fn test_cab_image() -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(b"MSCF");
        put_u32_le(&mut data, 8, 64); // cbCabinet
        put_u32_le(&mut data, 16, 44); // coffFiles
        data[24] = 3; // versionMajor/minor
        data[25] = 1;
        data
    }

    #[test]
    fn parse_reads_header() {
        let data = test_cab_image();
        let ctx = CabContext::parse(&data).unwrap();
        assert_eq!(ctx.cab_size, 64);
        assert_eq!(ctx.offset_of_files, 44);
        assert_eq!(ctx.num_folders, 0);
    }

    #[test]
    fn parse_rejects_flag_bits() {
        let mut data = test_cab_image();
        data[0x1e] = 0x04;
        assert!(matches!(
            CabContext::parse(&data),
            Err(SignError::CabFlagsUnsupported)
        ));
    }

    #[test]
    fn rewrite_inserts_reserve_area() {
        let data = test_cab_image();
        let ctx = CabContext::parse(&data).unwrap();
        let mut sink = HashingSink::new(DigestAlgorithm::Sha1, Vec::new());
        stream_image(&mut sink, &data, &ctx).unwrap();
        let (_, out) = sink.finish();

        assert_eq!(out.len(), data.len() + RESERVE_GROWTH as usize);
        // cabinet size and files offset both grew by 24
        assert_eq!(get_u32_le(&out, 8), 64 + 24);
        assert_eq!(get_u32_le(&out, 16), 44 + 24);
        // RESERVE_PRESENT flag set
        assert_eq!(out[0x1e], 0x04);
        // reserve header carries the adjusted size and the length sentinel
        assert_eq!(&out[36..44], &[0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00]);
        assert_eq!(get_u32_le(&out, 44), 64 + 24);
        assert_eq!(&out[SIGNATURE_LEN_OFFSET..SIGNATURE_LEN_OFFSET + 4], &[0xde, 0xad, 0xbe, 0xef]);
        // body bytes preserved
        assert_eq!(&out[60..], &data[36..]);
    }

    #[test]
    fn folder_offsets_are_shifted() {
        let mut data = test_cab_image();
        data[26] = 1; // one folder entry at offset 36
        put_u32_le(&mut data, 36, 100); // coffCabStart
        data[40] = 2; // cCFData
        let ctx = CabContext::parse(&data).unwrap();

        let mut sink = HashingSink::new(DigestAlgorithm::Sha1, Vec::new());
        stream_image(&mut sink, &data, &ctx).unwrap();
        let (_, out) = sink.finish();

        // folder entry now sits after the 24-byte reserve area
        assert_eq!(get_u32_le(&out, 60), 124);
        assert_eq!(out[64], 2);
    }

    #[test]
    fn digest_covers_rewritten_fields() {
        let data = test_cab_image();
        let ctx = CabContext::parse(&data).unwrap();
        let mut sink = HashingSink::new(DigestAlgorithm::Sha256, Vec::new());
        stream_image(&mut sink, &data, &ctx).unwrap();
        let (digest, _) = sink.finish();

        // reference: hash of the normalized byte sequence assembled by hand
        let mut expected = Vec::new();
        expected.extend_from_slice(&data[0..4]);
        expected.extend_from_slice(&(64u32 + 24).to_le_bytes());
        expected.extend_from_slice(&data[12..16]);
        expected.extend_from_slice(&(44u32 + 24).to_le_bytes());
        let mut tail = data[20..34].to_vec();
        tail[10] = 0x04;
        expected.extend_from_slice(&tail);
        expected.extend_from_slice(&[0, 0, 0, 0]); // hashed reserve tail
        expected.extend_from_slice(&data[36..]);
        assert_eq!(digest, DigestAlgorithm::Sha256.hash(&expected));
    }
}
