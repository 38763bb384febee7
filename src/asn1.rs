//! Minimal DER encoding and decoding primitives.
//!
//! The Authenticode structures are small and fixed enough that the DER is
//! built and walked by hand; the encoders here must produce byte-identical
//! output to the reference Microsoft encodings.

use crate::error::{SignError, SignResult};

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

/// DER length octets for a content length.
pub fn encode_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x100 {
        vec![0x81, len as u8]
    } else if len < 0x1_0000 {
        vec![0x82, (len >> 8) as u8, (len & 0xff) as u8]
    } else {
        vec![
            0x83,
            (len >> 16) as u8,
            (len >> 8) as u8,
            (len & 0xff) as u8,
        ]
    }
}

/// Tag + length + content.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 5);
    out.push(tag);
    out.extend_from_slice(&encode_len(content.len()));
    out.extend_from_slice(content);
    out
}

pub fn seq(content: &[u8]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, content)
}

pub fn set(content: &[u8]) -> Vec<u8> {
    tlv(TAG_SET, content)
}

/// OBJECT IDENTIFIER from pre-encoded body octets.
pub fn oid(body: &[u8]) -> Vec<u8> {
    tlv(TAG_OID, body)
}

pub fn octet_string(content: &[u8]) -> Vec<u8> {
    tlv(TAG_OCTET_STRING, content)
}

pub fn null() -> Vec<u8> {
    vec![TAG_NULL, 0x00]
}

/// INTEGER from a non-negative value.
pub fn integer(value: u64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0 && bytes[1] & 0x80 == 0 {
        bytes.remove(0);
    }
    tlv(TAG_INTEGER, &bytes)
}

/// INTEGER from unsigned big-endian magnitude bytes (certificate serials).
pub fn integer_from_magnitude(mag: &[u8]) -> Vec<u8> {
    let mut bytes: Vec<u8> = mag.iter().copied().skip_while(|&b| b == 0).collect();
    if bytes.is_empty() {
        bytes.push(0);
    } else if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    tlv(TAG_INTEGER, &bytes)
}

/// EXPLICIT context tag `[n]` wrapping an already encoded element.
pub fn context_explicit(n: u8, inner: &[u8]) -> Vec<u8> {
    tlv(0xa0 | n, inner)
}

/// IMPLICIT constructed context tag `[n]` over raw content octets.
pub fn context_implicit(n: u8, content: &[u8]) -> Vec<u8> {
    tlv(0xa0 | n, content)
}

/// IMPLICIT primitive context tag `[n]` over raw content octets.
pub fn context_primitive(n: u8, content: &[u8]) -> Vec<u8> {
    tlv(0x80 | n, content)
}

/// Length of a simple one-byte-tag ASN.1 header, or 0 when the buffer does
/// not start with one. Used when stripping SET/SEQUENCE/OCTET STRING headers
/// from opaque blobs.
pub fn simple_hdr_len(p: &[u8]) -> usize {
    if p.len() <= 2 || p[0] > 0x31 {
        return 0;
    }
    if p[1] & 0x80 == 0 {
        2
    } else {
        2 + (p[1] & 0x7f) as usize
    }
}

/// A decoded tag-length-value element.
#[derive(Debug, Clone, Copy)]
pub struct Tlv<'a> {
    pub tag: u8,
    /// Content octets.
    pub content: &'a [u8],
    /// Complete element including tag and length.
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Reader over this element's content.
    pub fn reader(&self) -> Reader<'a> {
        Reader::new(self.content)
    }
}

/// Sequential DER reader.
pub struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { rest: data }
    }

    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.rest
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.rest.first().copied()
    }

    /// Read the next element.
    pub fn read(&mut self) -> SignResult<Tlv<'a>> {
        let d = self.rest;
        if d.len() < 2 {
            return Err(SignError::Asn1("truncated element".into()));
        }
        let tag = d[0];
        if tag & 0x1f == 0x1f {
            return Err(SignError::Asn1("multi-byte tags unsupported".into()));
        }
        let (hdr, len) = if d[1] & 0x80 == 0 {
            (2usize, d[1] as usize)
        } else {
            let n = (d[1] & 0x7f) as usize;
            if n == 0 || n > 4 || d.len() < 2 + n {
                return Err(SignError::Asn1("bad length octets".into()));
            }
            let mut len = 0usize;
            for &b in &d[2..2 + n] {
                len = (len << 8) | b as usize;
            }
            (2 + n, len)
        };
        if d.len() < hdr + len {
            return Err(SignError::Asn1("element exceeds buffer".into()));
        }
        let element = Tlv {
            tag,
            content: &d[hdr..hdr + len],
            raw: &d[..hdr + len],
        };
        self.rest = &d[hdr + len..];
        Ok(element)
    }

    /// Read the next element, requiring the given tag.
    pub fn expect(&mut self, tag: u8) -> SignResult<Tlv<'a>> {
        let element = self.read()?;
        if element.tag != tag {
            return Err(SignError::Asn1(format!(
                "expected tag {tag:#04x}, found {:#04x}",
                element.tag
            )));
        }
        Ok(element)
    }
}
