//! PKCS#7 `SignedData` assembly for Authenticode.
//!
//! The bundle is built by hand rather than through a PKCS#7 library: the
//! content is the Microsoft `SpcIndirectDataContent` rather than pkcs7-data,
//! the signer carries Microsoft signed attributes, and `signingTime` must
//! never be emitted (Windows rejects signers that carry it). Building the
//! `SignerInfo` manually makes that the natural outcome instead of a library
//! workaround.

use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;

use crate::asn1::{self, Reader};
use crate::error::{SignError, SignResult};
use crate::keys::KeyMaterial;
use crate::spc::{self, oids};
use crate::{DigestAlgorithm, FileKind};

/// Signed-attribute payload options supplied on the command line.
#[derive(Debug, Default, Clone)]
pub struct BundleOptions {
    pub description: Option<String>,
    pub url: Option<String>,
    /// Commercial rather than individual code-signing statement.
    pub commercial: bool,
    /// Add the low Java permission attribute (CAB only).
    pub java_low: bool,
}

/// An assembled Authenticode `SignedData`, mutable until serialization so
/// the timestamper can install countersignatures and extra certificates.
pub struct SignedBundle {
    digest_alg: DigestAlgorithm,
    /// Complete `SpcIndirectDataContent` DER with the real file digest.
    content: Vec<u8>,
    certificates: Vec<Vec<u8>>,
    issuer_der: Vec<u8>,
    serial_magnitude: Vec<u8>,
    authenticated_attrs: Vec<Vec<u8>>,
    encrypted_digest: Vec<u8>,
    unsigned_attrs: Vec<Vec<u8>>,
}

/// A complete `Attribute` element: `SEQUENCE { type, SET { value } }`.
fn attribute(oid_body: &[u8], value: &[u8]) -> Vec<u8> {
    asn1::seq(&[asn1::oid(oid_body), asn1::set(value)].concat())
}

/// Pick the signing certificate: the explicitly supplied one, or the first
/// chain certificate whose public key matches the private key.
fn select_signer<'a>(material: &'a KeyMaterial) -> SignResult<&'a X509> {
    if let Some(cert) = &material.cert {
        return Ok(cert);
    }
    for cert in &material.chain {
        if let Ok(pubkey) = cert.public_key() {
            if pubkey.public_eq(&material.key) {
                return Ok(cert);
            }
        }
    }
    Err(SignError::SignerSelection)
}

impl SignedBundle {
    /// Assemble and sign a bundle over the given file digest.
    pub fn create(
        material: &KeyMaterial,
        alg: DigestAlgorithm,
        kind: FileKind,
        file_digest: &[u8],
        opts: &BundleOptions,
    ) -> SignResult<Self> {
        let signer_cert = select_signer(material)?;
        log::debug!(
            "signing as {}",
            signer_cert
                .subject_name()
                .entries()
                .next()
                .and_then(|e| e.data().as_utf8().ok())
                .map(|s| s.to_string())
                .unwrap_or_default()
        );

        let mut content = spc::indirect_data_blob(alg, kind);
        let tail = content.len() - alg.digest_size();
        content[tail..].copy_from_slice(file_digest);

        // The signed octets are the indirect data minus its outer header.
        let stripped = &content[asn1::simple_hdr_len(&content)..];

        let mut attrs = vec![attribute(
            oids::PKCS9_CONTENT_TYPE,
            &asn1::oid(oids::SPC_INDIRECT_DATA),
        )];
        if opts.java_low {
            attrs.push(attribute(oids::SPC_MS_JAVA, &spc::JAVA_ATTRS_LOW));
        }
        let purpose: &[u8] = if opts.commercial {
            &spc::PURPOSE_COMMERCIAL
        } else {
            &spc::PURPOSE_INDIVIDUAL
        };
        attrs.push(attribute(oids::SPC_STATEMENT_TYPE, purpose));
        if opts.description.is_some() || opts.url.is_some() {
            let opus = spc::opus_info(opts.description.as_deref(), opts.url.as_deref());
            attrs.push(attribute(oids::SPC_SP_OPUS_INFO, &opus));
        }
        attrs.push(attribute(
            oids::PKCS9_MESSAGE_DIGEST,
            &asn1::octet_string(&alg.hash(stripped)),
        ));
        attrs.sort();

        let tbs = asn1::set(&attrs.concat());
        let encrypted_digest = sign_rsa(&material.key, alg, &tbs)?;

        let mut certificates = Vec::new();
        if let Some(cert) = &material.cert {
            certificates.push(cert.to_der()?);
        }
        for cert in material.chain.iter().rev() {
            certificates.push(cert.to_der()?);
        }

        Ok(SignedBundle {
            digest_alg: alg,
            content,
            certificates,
            issuer_der: signer_cert.issuer_name().to_der()?,
            serial_magnitude: signer_cert.serial_number().to_bn()?.to_vec(),
            authenticated_attrs: attrs,
            encrypted_digest,
            unsigned_attrs: Vec::new(),
        })
    }

    pub fn digest_alg(&self) -> DigestAlgorithm {
        self.digest_alg
    }

    /// The signature octets, borrowed for timestamp request emission.
    pub fn encrypted_digest(&self) -> &[u8] {
        &self.encrypted_digest
    }

    /// Install an unsigned attribute on the (single) signer.
    pub fn add_unsigned_attribute(&mut self, oid_body: &[u8], value: &[u8]) {
        self.unsigned_attrs.push(attribute(oid_body, value));
    }

    /// Install certificates in reverse order, matching the reference
    /// emission of timestamp-authority chains.
    pub fn add_certificates_reversed<I>(&mut self, certs: I)
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut certs: Vec<Vec<u8>> = certs.into_iter().collect();
        certs.reverse();
        self.certificates.extend(certs);
    }

    fn signer_info(&self) -> Vec<u8> {
        let mut parts = asn1::integer(1);
        parts.extend_from_slice(&asn1::seq(
            &[
                self.issuer_der.clone(),
                asn1::integer_from_magnitude(&self.serial_magnitude),
            ]
            .concat(),
        ));
        parts.extend_from_slice(&spc::algorithm_identifier(self.digest_alg.oid_body()));
        parts.extend_from_slice(&asn1::context_implicit(
            0,
            &self.authenticated_attrs.concat(),
        ));
        parts.extend_from_slice(&spc::algorithm_identifier(oids::RSA_ENCRYPTION));
        parts.extend_from_slice(&asn1::octet_string(&self.encrypted_digest));
        if !self.unsigned_attrs.is_empty() {
            let mut unsigned = self.unsigned_attrs.clone();
            unsigned.sort();
            parts.extend_from_slice(&asn1::context_implicit(1, &unsigned.concat()));
        }
        asn1::seq(&parts)
    }

    /// Serialize the full `ContentInfo { signedData }` DER.
    pub fn serialize(&self) -> Vec<u8> {
        let digest_algorithms =
            asn1::set(&spc::algorithm_identifier(self.digest_alg.oid_body()));
        let content_info = asn1::seq(
            &[
                asn1::oid(oids::SPC_INDIRECT_DATA),
                asn1::context_explicit(0, &self.content),
            ]
            .concat(),
        );

        let mut signed_data = asn1::integer(1);
        signed_data.extend_from_slice(&digest_algorithms);
        signed_data.extend_from_slice(&content_info);
        signed_data.extend_from_slice(&asn1::context_implicit(0, &self.certificates.concat()));
        signed_data.extend_from_slice(&asn1::set(&self.signer_info()));
        let signed_data = asn1::seq(&signed_data);

        asn1::seq(
            &[
                asn1::oid(oids::PKCS7_SIGNED_DATA),
                asn1::context_explicit(0, &signed_data),
            ]
            .concat(),
        )
    }
}

fn sign_rsa(key: &PKey<Private>, alg: DigestAlgorithm, data: &[u8]) -> SignResult<Vec<u8>> {
    let mut signer = Signer::new(alg.message_digest(), key)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

/// Certificates and signer infos pulled out of a third-party `SignedData`
/// (a timestamp authority reply).
pub struct ParsedSignedData {
    pub certificates: Vec<Vec<u8>>,
    pub signer_infos: Vec<Vec<u8>>,
}

/// Walk a `ContentInfo { signedData }` and collect the raw certificate and
/// `SignerInfo` elements.
pub fn parse_signed_data(der: &[u8]) -> SignResult<ParsedSignedData> {
    let mut reader = Reader::new(der);
    let content_info = reader.expect(asn1::TAG_SEQUENCE)?;
    let mut ci = content_info.reader();
    let type_oid = ci.expect(asn1::TAG_OID)?;
    if type_oid.content != oids::PKCS7_SIGNED_DATA {
        return Err(SignError::Asn1("not a PKCS#7 SignedData".into()));
    }
    let wrapper = ci.expect(0xa0)?;
    let signed_data = wrapper.reader().expect(asn1::TAG_SEQUENCE)?;
    let mut sd = signed_data.reader();

    let _version = sd.expect(asn1::TAG_INTEGER)?;
    let _digest_algorithms = sd.expect(asn1::TAG_SET)?;
    let _content = sd.expect(asn1::TAG_SEQUENCE)?;

    let mut certificates = Vec::new();
    let mut signer_infos = Vec::new();
    while !sd.is_empty() {
        let element = sd.read()?;
        match element.tag {
            0xa0 => {
                let mut certs = element.reader();
                while !certs.is_empty() {
                    certificates.push(certs.read()?.raw.to_vec());
                }
            }
            0xa1 => {} // CRLs, ignored
            asn1::TAG_SET => {
                let mut infos = element.reader();
                while !infos.is_empty() {
                    signer_infos.push(infos.read()?.raw.to_vec());
                }
            }
            _ => {}
        }
    }
    if signer_infos.is_empty() {
        return Err(SignError::Asn1("SignedData without signer info".into()));
    }
    Ok(ParsedSignedData {
        certificates,
        signer_infos,
    })
}

/// Extract the embedded `SpcIndirectDataContent` from a signature blob:
/// `Some(raw SEQUENCE)` when the content type matches and the content is a
/// SEQUENCE, `None` for foreign content types.
pub fn extract_spc_content(der: &[u8]) -> SignResult<Option<Vec<u8>>> {
    let mut reader = Reader::new(der);
    let content_info = reader.expect(asn1::TAG_SEQUENCE)?;
    let mut ci = content_info.reader();
    let type_oid = ci.expect(asn1::TAG_OID)?;
    if type_oid.content != oids::PKCS7_SIGNED_DATA {
        return Ok(None);
    }
    let wrapper = ci.expect(0xa0)?;
    let signed_data = wrapper.reader().expect(asn1::TAG_SEQUENCE)?;
    let mut sd = signed_data.reader();
    let _version = sd.expect(asn1::TAG_INTEGER)?;
    let _digest_algorithms = sd.expect(asn1::TAG_SET)?;
    let inner = sd.expect(asn1::TAG_SEQUENCE)?;

    let mut inner_reader = inner.reader();
    let inner_type = inner_reader.expect(asn1::TAG_OID)?;
    if inner_type.content != oids::SPC_INDIRECT_DATA || inner_reader.is_empty() {
        return Ok(None);
    }
    let content = inner_reader.expect(0xa0)?;
    let spc = content.reader().read()?;
    if spc.tag != asn1::TAG_SEQUENCE {
        return Ok(None);
    }
    Ok(Some(spc.raw.to_vec()))
}
