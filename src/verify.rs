//! PE signature verification.
//!
//! Re-hashes the image, extracts the signed digest from the embedded
//! `SpcIndirectDataContent`, checks the PKCS#7 signature math (no trust
//! chain), and reports the findings. Returns 0 for a clean file, 1 for any
//! mismatch.

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509NameRef, X509};

use crate::asn1;
use crate::error::SignResult;
use crate::format::{get_u16_le, get_u32_le, pe};
use crate::spc::{self, ParsedIndirectData};
use crate::{pkcs7, SignError};

fn tohex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn name_oneline(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            format!(
                "/{}={}",
                entry.object().nid().short_name().unwrap_or("?"),
                entry
                    .data()
                    .as_utf8()
                    .map(|s| s.to_string())
                    .unwrap_or_default()
            )
        })
        .collect()
}

/// A signature candidate pulled out of the `WIN_CERTIFICATE` array.
struct ExtractedSignature {
    der: Vec<u8>,
    content: Vec<u8>,
    indirect: ParsedIndirectData,
}

/// Walk the certificate table and return the first PKCS#7 entry carrying an
/// `SpcIndirectDataContent`.
fn extract_signature_entry(data: &[u8], sigpos: usize, siglen: usize) -> Option<ExtractedSignature> {
    let mut pos = 0usize;
    while pos + 8 <= siglen {
        let entry_len = get_u32_le(data, sigpos + pos) as usize;
        let revision = get_u16_le(data, sigpos + pos + 4);
        let cert_type = get_u16_le(data, sigpos + pos + 6);
        if entry_len < 8 || pos + entry_len > siglen {
            break;
        }
        if revision == pe::WIN_CERT_REVISION_2 && cert_type == pe::WIN_CERT_TYPE_PKCS_SIGNED_DATA
        {
            let der = &data[sigpos + pos + 8..sigpos + pos + entry_len];
            if let Ok(Some(content)) = pkcs7::extract_spc_content(der) {
                if let Ok(indirect) = spc::parse_indirect_data(&content) {
                    return Some(ExtractedSignature {
                        der: der.to_vec(),
                        content,
                        indirect,
                    });
                }
            }
        }
        pos += entry_len + (8 - entry_len % 8) % 8;
    }
    None
}

/// Verify a signed PE file and print the report. Returns the process exit
/// code: 0 on full match, 1 on any mismatch or a missing digest.
pub fn verify_pe(data: &[u8]) -> SignResult<i32> {
    let ctx = pe::PeContext::parse(data)?;
    let mut ret = 0;

    let stored_checksum = get_u32_le(data, ctx.checksum_offset());
    println!("Current PE checksum   : {stored_checksum:08X}");
    let calculated_checksum = pe::calc_checksum(data, ctx.checksum_offset());
    if stored_checksum != 0 && stored_checksum != calculated_checksum {
        ret = 1;
    }
    println!(
        "Calculated PE checksum: {calculated_checksum:08X}{}\n",
        if ret != 0 { "     MISMATCH!!!!" } else { "" }
    );

    if ctx.sig_length == 0 {
        println!("No signature found.\n");
        return Ok(ret);
    }
    let sigpos = ctx.sig_offset as usize;
    let siglen = ctx.sig_length as usize;

    let Some(signature) = extract_signature_entry(data, sigpos, siglen) else {
        println!("Failed to extract current message digest\n");
        return Ok(1);
    };

    println!(
        "Message digest algorithm  : {}",
        signature.indirect.algorithm.as_str()
    );
    println!(
        "Current message digest    : {}",
        tohex(&signature.indirect.digest)
    );

    let calculated_digest = pe::digest_image(data, &ctx, signature.indirect.algorithm, sigpos)?;
    let digest_ok = calculated_digest == signature.indirect.digest;
    if !digest_ok {
        ret = 1;
    }
    println!(
        "Calculated message digest : {}{}\n",
        tohex(&calculated_digest),
        if digest_ok { "" } else { "    MISMATCH!!!" }
    );

    if let Some((kind, blob)) = spc::extract_page_hash(&signature.indirect.data_raw) {
        println!("Page hash algorithm: {}", kind.as_str());
        let shown = blob.len().min(32);
        println!("Page hash          : {} ...\n", tohex(&blob[..shown]));
    }

    ret = verify_pkcs7(&signature, ret)?;
    println!();
    Ok(ret)
}

/// Cryptographic check and signer/certificate report.
fn verify_pkcs7(signature: &ExtractedSignature, mut ret: i32) -> SignResult<i32> {
    let p7 = Pkcs7::from_der(&signature.der)
        .map_err(|e| SignError::Asn1(format!("bad PKCS#7 blob: {e}")))?;

    let mut certs: Stack<X509> = Stack::new()?;
    if let Some(embedded) = p7.signed().and_then(|signed| signed.certificates()) {
        for cert in embedded {
            certs.push(cert.to_owned())?;
        }
    }
    let store = X509StoreBuilder::new()?.build();

    let stripped = &signature.content[asn1::simple_hdr_len(&signature.content)..];
    let verify_ok = p7
        .verify(&certs, &store, Some(stripped), None, Pkcs7Flags::NOVERIFY)
        .is_ok();
    println!(
        "Signature verification: {}\n",
        if verify_ok { "ok" } else { "failed" }
    );
    if !verify_ok {
        ret = 1;
    }

    let signers = p7.signers(&certs, Pkcs7Flags::empty())?;
    println!("Number of signers: {}", signers.len());
    for (i, cert) in signers.iter().enumerate() {
        println!(
            "\tSigner #{i}:\n\t\tSubject: {}\n\t\tIssuer : {}",
            name_oneline(cert.subject_name()),
            name_oneline(cert.issuer_name())
        );
    }

    println!("\nNumber of certificates: {}", certs.len());
    for (i, cert) in certs.iter().enumerate() {
        println!(
            "\tCert #{i}:\n\t\tSubject: {}\n\t\tIssuer : {}",
            name_oneline(cert.subject_name()),
            name_oneline(cert.issuer_name())
        );
    }
    Ok(ret)
}
