//! Microsoft SPC structures: `SpcIndirectDataContent` and friends.
//!
//! Builders emit the exact DER the reference tooling produces; the parser
//! side recovers the signed digest and the optional page-hash blob during
//! verification.

use crate::asn1::{self, Reader, Tlv};
use crate::error::{SignError, SignResult};
use crate::{DigestAlgorithm, FileKind};

/// OID body octets for the Microsoft Authenticode object identifiers.
pub mod oids {
    /// 1.3.6.1.4.1.311.2.1.4
    pub const SPC_INDIRECT_DATA: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x04];
    /// 1.3.6.1.4.1.311.2.1.11
    pub const SPC_STATEMENT_TYPE: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x0b];
    /// 1.3.6.1.4.1.311.2.1.12
    pub const SPC_SP_OPUS_INFO: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x0c];
    /// 1.3.6.1.4.1.311.2.1.15
    pub const SPC_PE_IMAGE_DATA: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x0f];
    /// 1.3.6.1.4.1.311.2.1.25
    pub const SPC_CAB_DATA: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x19];
    /// 1.3.6.1.4.1.311.2.1.30
    pub const SPC_SIPINFO: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x1e];
    /// 1.3.6.1.4.1.311.3.2.1
    pub const SPC_TIME_STAMP_REQUEST: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x03, 0x02, 0x01];
    /// 1.3.6.1.4.1.311.15.1
    pub const SPC_MS_JAVA: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x0f, 0x01];
    /// 1.3.6.1.4.1.311.2.3.1 (page hashes, SHA-1)
    pub const SPC_PAGE_HASHES_V1: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x03, 0x01];
    /// 1.3.6.1.4.1.311.2.3.2 (page hashes, SHA-256)
    pub const SPC_PAGE_HASHES_V2: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x03, 0x02];

    /// 1.2.840.113549.1.7.1 (pkcs7-data)
    pub const PKCS7_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];
    /// 1.2.840.113549.1.7.2 (pkcs7-signedData)
    pub const PKCS7_SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
    /// 1.2.840.113549.1.9.3 (contentType)
    pub const PKCS9_CONTENT_TYPE: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x03];
    /// 1.2.840.113549.1.9.4 (messageDigest)
    pub const PKCS9_MESSAGE_DIGEST: &[u8] =
        &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];
    /// 1.2.840.113549.1.9.6 (countersignature)
    pub const PKCS9_COUNTERSIGNATURE: &[u8] =
        &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x06];
    /// 1.2.840.113549.1.9.16.2.14 (id-aa-timeStampToken)
    pub const TIMESTAMP_TOKEN: &[u8] = &[
        0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x10, 0x02, 0x0e,
    ];
    /// 1.2.840.113549.1.1.1 (rsaEncryption)
    pub const RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
}

/// The BMPString `<<<Obsolete>>>` carried in every SpcLink file reference.
pub const OBSOLETE_BMP: [u8; 28] = [
    0x00, 0x3c, 0x00, 0x3c, 0x00, 0x3c, 0x00, 0x4f, 0x00, 0x62, 0x00, 0x73, 0x00, 0x6f, 0x00,
    0x6c, 0x00, 0x65, 0x00, 0x74, 0x00, 0x65, 0x00, 0x3e, 0x00, 0x3e, 0x00, 0x3e,
];

/// The fixed `SpcSipinfo.string` GUID used for MSI packages.
pub const MSI_SIPINFO_STRING: [u8; 16] = [
    0xf1, 0x10, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x46,
];

/// SPC_STATEMENT_TYPE value for individual code signing.
pub const PURPOSE_INDIVIDUAL: [u8; 14] = [
    0x30, 0x0c, 0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x15,
];

/// SPC_STATEMENT_TYPE value for commercial code signing.
pub const PURPOSE_COMMERCIAL: [u8; 14] = [
    0x30, 0x0c, 0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x16,
];

/// SPC_MS_JAVA value for the "low" permission level.
pub const JAVA_ATTRS_LOW: [u8; 8] = [0x30, 0x06, 0x03, 0x02, 0x00, 0x01, 0x30, 0x00];

/// Class id marking a SpcSerializedObject as a page-hash container.
pub const CLASSID_PAGE_HASH: [u8; 16] = [
    0xa6, 0xb5, 0x86, 0xd5, 0xb4, 0xa1, 0x24, 0x66, 0xae, 0x05, 0xa2, 0x17, 0xda, 0x8e, 0x60,
    0xd6,
];

/// `AlgorithmIdentifier { algorithm, NULL }`.
pub fn algorithm_identifier(oid_body: &[u8]) -> Vec<u8> {
    asn1::seq(&[asn1::oid(oid_body), asn1::null()].concat())
}

/// SpcLink with the CHOICE `[2] file` holding the obsolete BMPString.
fn obsolete_link() -> Vec<u8> {
    // SpcString CHOICE [0] IMPLICIT BMPString
    let spc_string = asn1::context_primitive(0, &OBSOLETE_BMP);
    // SpcLink CHOICE [2] EXPLICIT SpcString
    asn1::context_explicit(2, &spc_string)
}

/// Build the `SpcIndirectDataContent` DER with an all-zero digest placeholder.
/// The signer substitutes the real file digest into the trailing
/// `digest_size` bytes before use.
pub fn indirect_data_blob(alg: DigestAlgorithm, kind: FileKind) -> Vec<u8> {
    let (type_oid, inner): (&[u8], Vec<u8>) = match kind {
        FileKind::Pe => {
            // SpcPeImageData { flags = empty BIT STRING, [0] file = SpcLink }
            let flags = asn1::tlv(asn1::TAG_BIT_STRING, &[0x00]);
            let file = asn1::context_explicit(0, &obsolete_link());
            let image_data = asn1::seq(&[flags, file].concat());
            (oids::SPC_PE_IMAGE_DATA, image_data)
        }
        FileKind::Cab => (oids::SPC_CAB_DATA, obsolete_link()),
        FileKind::Msi => {
            let mut fields = asn1::integer(1);
            fields.extend_from_slice(&asn1::octet_string(&MSI_SIPINFO_STRING));
            for _ in 0..5 {
                fields.extend_from_slice(&asn1::integer(0));
            }
            (oids::SPC_SIPINFO, asn1::seq(&fields))
        }
    };

    let data = asn1::seq(&[asn1::oid(type_oid), inner].concat());
    let digest_info = asn1::seq(
        &[
            algorithm_identifier(alg.oid_body()),
            asn1::octet_string(&vec![0u8; alg.digest_size()]),
        ]
        .concat(),
    );
    asn1::seq(&[data, digest_info].concat())
}

/// `SpcSpOpusInfo { [0] programName, [1] moreInfo }`.
///
/// The program name is carried as the `[1] ascii` SpcString choice and the
/// URL as the `[0] url` SpcLink choice, matching the reference emission.
pub fn opus_info(desc: Option<&str>, url: Option<&str>) -> Vec<u8> {
    let mut content = Vec::new();
    if let Some(desc) = desc {
        let program_name = asn1::context_primitive(1, desc.as_bytes());
        content.extend_from_slice(&asn1::context_explicit(0, &program_name));
    }
    if let Some(url) = url {
        let more_info = asn1::context_primitive(0, url.as_bytes());
        content.extend_from_slice(&asn1::context_explicit(1, &more_info));
    }
    asn1::seq(&content)
}

/// Digest and inner data recovered from a signed `SpcIndirectDataContent`.
#[derive(Debug)]
pub struct ParsedIndirectData {
    /// The complete `SpcAttributeTypeAndOptionalValue` element.
    pub data_raw: Vec<u8>,
    pub algorithm: DigestAlgorithm,
    pub digest: Vec<u8>,
}

/// Decode an `SpcIndirectDataContent` element.
pub fn parse_indirect_data(der: &[u8]) -> SignResult<ParsedIndirectData> {
    let mut reader = Reader::new(der);
    let outer = reader.expect(asn1::TAG_SEQUENCE)?;
    let mut fields = outer.reader();

    let data = fields.expect(asn1::TAG_SEQUENCE)?;
    let digest_info = fields.expect(asn1::TAG_SEQUENCE)?;

    let mut di = digest_info.reader();
    let alg_id = di.expect(asn1::TAG_SEQUENCE)?;
    let digest = di.expect(asn1::TAG_OCTET_STRING)?;

    let alg_oid = alg_id.reader().expect(asn1::TAG_OID)?;
    let algorithm = DigestAlgorithm::from_oid_body(alg_oid.content)
        .ok_or_else(|| SignError::Asn1("unknown digest algorithm OID".into()))?;

    Ok(ParsedIndirectData {
        data_raw: data.raw.to_vec(),
        algorithm,
        digest: digest.content.to_vec(),
    })
}

/// Page-hash digest families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageHashKind {
    Sha1,
    Sha256,
}

impl PageHashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageHashKind::Sha1 => "sha1",
            PageHashKind::Sha256 => "sha256",
        }
    }
}

/// Pull the page-hash blob out of an `SpcAttributeTypeAndOptionalValue`,
/// when the inner SpcLink is a serialized object carrying one. Returns
/// `None` for signatures without page hashes (the common case).
pub fn extract_page_hash(data_raw: &[u8]) -> Option<(PageHashKind, Vec<u8>)> {
    let mut fields = Reader::new(data_raw)
        .expect(asn1::TAG_SEQUENCE)
        .ok()?
        .reader();
    let type_oid = fields.expect(asn1::TAG_OID).ok()?;
    if type_oid.content != oids::SPC_PE_IMAGE_DATA {
        return None;
    }
    let image_data = fields.expect(asn1::TAG_SEQUENCE).ok()?;
    let mut pid = image_data.reader();
    let _flags = pid.expect(asn1::TAG_BIT_STRING).ok()?;
    let file = pid.expect(0xa0).ok()?;

    // Only the [1] moniker choice (SpcSerializedObject) carries page hashes.
    let link: Tlv = file.reader().read().ok()?;
    if link.tag != 0xa1 {
        return None;
    }
    let mut obj = link.reader();
    let class_id = obj.expect(asn1::TAG_OCTET_STRING).ok()?;
    let serialized = obj.expect(asn1::TAG_OCTET_STRING).ok()?;
    if class_id.content != CLASSID_PAGE_HASH {
        return None;
    }

    // Skip the SET header wrapping the serialized attribute.
    let hdr = asn1::simple_hdr_len(serialized.content).min(serialized.content.len());
    let mut attr = Reader::new(&serialized.content[hdr..])
        .expect(asn1::TAG_SEQUENCE)
        .ok()?
        .reader();
    let ph_oid = attr.expect(asn1::TAG_OID).ok()?;
    let kind = if ph_oid.content == oids::SPC_PAGE_HASHES_V1 {
        PageHashKind::Sha1
    } else if ph_oid.content == oids::SPC_PAGE_HASHES_V2 {
        PageHashKind::Sha256
    } else {
        return None;
    };

    // Skip the SET and OCTET STRING headers; the remainder is the blob.
    let value = attr.remaining();
    let set_hdr = asn1::simple_hdr_len(value).min(value.len());
    let oct_hdr = asn1::simple_hdr_len(&value[set_hdr..]).min(value.len() - set_hdr);
    Some((kind, value[set_hdr + oct_hdr..].to_vec()))
}
