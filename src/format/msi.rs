//! MSI (OLE compound file) walker.
//!
//! Streams are hashed in a defined sort order over their UTF-16LE names and
//! copied into the output compound file; the root storage class id is hashed
//! last. The `\x05DigitalSignature` stream is never part of the digest.

use std::cmp::Ordering;
use std::io::{Cursor, Read, Seek, Write};

use cfb::CompoundFile;
use digest::DynDigest;

use crate::error::{SignError, SignResult};

/// Decoded name of the signature stream.
pub const DIGITAL_SIGNATURE: &str = "\u{5}DigitalSignature";

const CHUNK: usize = 4096;

fn base64_char(x: u8) -> u8 {
    match x {
        0..=9 => x + b'0',
        10..=35 => x - 10 + b'A',
        36..=61 => x - 36 + b'a',
        62 => b'.',
        _ => b'_',
    }
}

/// Reverse the MSI stream-name compression.
///
/// Operates on the UTF-8 bytes of the stored name: the tag `e4 a1 80`
/// (U+4840) is skipped, `e3 a0..`/`e4 <a0` pairs decode two base64
/// characters, `e4 a0 ..` decodes one, anything else passes through.
pub fn decode_name(name: &str) -> String {
    let mut input = name.as_bytes();
    let mut out = Vec::with_capacity(input.len());

    if input.len() >= 3 && input[0] == 0xe4 && input[1] == 0xa1 && input[2] == 0x80 {
        input = &input[3..];
    }

    let mut i = 0usize;
    while i < input.len() {
        let ch = input[i];
        if i + 2 < input.len() {
            if (ch == 0xe3 && input[i + 1] >= 0xa0) || (ch == 0xe4 && input[i + 1] < 0xa0) {
                out.push(base64_char(input[i + 2] & 0x7f));
                out.push(base64_char(input[i + 1] ^ 0xa0));
                i += 3;
                continue;
            }
            if ch == 0xe4 && input[i + 1] == 0xa0 {
                out.push(base64_char(input[i + 2] & 0x7f));
                i += 3;
                continue;
            }
        }
        out.push(ch);
        i += 1;
        // carry the continuation bytes of a multi-byte UTF-8 sequence
        let extra = if ch >= 0xf0 {
            3
        } else if ch >= 0xe0 {
            2
        } else if ch >= 0xc1 {
            1
        } else {
            0
        };
        for _ in 0..extra {
            if i < input.len() {
                out.push(input[i]);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Stream-name ordering: compare the UTF-16LE encodings byte-wise over the
/// shorter length; on a tie the longer name sorts last.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let wa: Vec<u8> = a.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let wb: Vec<u8> = b.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let n = wa.len().min(wb.len());
    match wa[..n].cmp(&wb[..n]) {
        Ordering::Equal => wa.len().cmp(&wb.len()),
        other => other,
    }
}

/// Hash the root-level streams of `input` in sorted order, copying each into
/// `output`, then hash (and carry over) the root storage class id.
pub fn stream_image<R, W>(
    input: &mut CompoundFile<R>,
    output: &mut CompoundFile<W>,
    hasher: &mut Box<dyn DynDigest>,
) -> SignResult<()>
where
    R: Read + Seek,
    W: Read + Seek + Write,
{
    let class_id = *input.root_entry().clsid();

    let mut names: Vec<String> = input
        .read_root_storage()
        .filter(|entry| entry.is_stream())
        .map(|entry| entry.name().to_string())
        .filter(|name| decode_name(name) != DIGITAL_SIGNATURE)
        .collect();
    names.sort_by(|a, b| compare_names(a, b));

    for name in &names {
        let path = format!("/{name}");
        let mut stream = input
            .open_stream(&path)
            .map_err(|e| SignError::Msi(format!("failed to open stream '{name}': {e}")))?;
        let mut out_stream = output
            .create_stream(&path)
            .map_err(|e| SignError::Msi(format!("failed to create stream '{name}': {e}")))?;

        let mut buf = [0u8; CHUNK];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            out_stream.write_all(&buf[..n])?;
        }
        out_stream.flush()?;
    }

    hasher.update(&class_id.to_bytes_le());
    output
        .set_storage_clsid("/", class_id)
        .map_err(|e| SignError::Msi(format!("failed to set root class id: {e}")))?;
    Ok(())
}

/// Hash an MSI held in memory and return `(digest, signed output bytes)`
/// once the caller appends the signature stream to the returned compound
/// file. Convenience wrapper used by the signing pipeline.
pub fn open_in_memory(data: &[u8]) -> SignResult<CompoundFile<Cursor<Vec<u8>>>> {
    CompoundFile::open(Cursor::new(data.to_vec()))
        .map_err(|e| SignError::Msi(format!("failed to parse compound file: {e}")))
}
