//! Signing pipelines: hash the container, assemble the signed bundle, and
//! inject it back at the format-specific location.

use std::io::{Cursor, Write};

use cfb::CompoundFile;
use digest::DynDigest;

use crate::error::{SignError, SignResult};
use crate::format::{cab, msi, pe, put_u32_le, FileKind};
use crate::keys::KeyMaterial;
use crate::pkcs7::{BundleOptions, SignedBundle};
use crate::sink::HashingSink;
use crate::timestamp::{TimestampMode, Timestamper};
use crate::DigestAlgorithm;

/// `-jp` levels. Medium and high are reserved by the format and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JavaPermissionLevel {
    Low,
    Medium,
    High,
}

/// Everything the sign command needs beyond the key material.
#[derive(Default)]
pub struct SignOptions {
    pub digest_alg: DigestAlgorithm,
    pub description: Option<String>,
    pub url: Option<String>,
    pub java_level: Option<JavaPermissionLevel>,
    pub commercial: bool,
    pub timestamp: Option<TimestampMode>,
    pub proxy: Option<String>,
}

/// Sign `data`, returning the complete output file.
pub fn sign_file(data: &[u8], material: &KeyMaterial, opts: &SignOptions) -> SignResult<Vec<u8>> {
    match opts.java_level {
        Some(JavaPermissionLevel::Medium) => {
            return Err(SignError::UnsupportedJpLevel("medium".into()))
        }
        Some(JavaPermissionLevel::High) => {
            return Err(SignError::UnsupportedJpLevel("high".into()))
        }
        _ => {}
    }

    let kind = FileKind::detect(data)?;
    log::info!("signing {kind} file ({} bytes)", data.len());
    match kind {
        FileKind::Pe => sign_pe(data, material, opts),
        FileKind::Cab => sign_cab(data, material, opts),
        FileKind::Msi => sign_msi(data, material, opts),
    }
}

fn build_bundle(
    kind: FileKind,
    digest: &[u8],
    material: &KeyMaterial,
    opts: &SignOptions,
) -> SignResult<SignedBundle> {
    let bundle_opts = BundleOptions {
        description: opts.description.clone(),
        url: opts.url.clone(),
        commercial: opts.commercial,
        java_low: kind == FileKind::Cab && opts.java_level == Some(JavaPermissionLevel::Low),
    };
    let mut bundle =
        SignedBundle::create(material, opts.digest_alg, kind, digest, &bundle_opts)?;

    if let Some(mode) = &opts.timestamp {
        let timestamper = Timestamper::new(opts.proxy.as_deref())?;
        timestamper.timestamp(mode, &mut bundle)?;
    }
    Ok(bundle)
}

fn eight_byte_pad(len: usize) -> usize {
    (8 - len % 8) % 8
}

fn sign_pe(data: &[u8], material: &KeyMaterial, opts: &SignOptions) -> SignResult<Vec<u8>> {
    if opts.java_level.is_some() {
        log::warn!("the java permission level option is only valid for CAB files");
    }
    let ctx = pe::PeContext::parse(data)?;

    let mut sink = HashingSink::new(opts.digest_alg, Vec::with_capacity(data.len() + 4096));
    let mut image_end = ctx.image_end(data.len());
    pe::stream_image(&mut sink, data, &ctx, image_end)?;
    let pad = eight_byte_pad(image_end);
    if pad > 0 {
        sink.write(&vec![0u8; pad])?;
        image_end += pad;
    }
    let (digest, mut out) = sink.finish();

    let bundle = build_bundle(FileKind::Pe, &digest, material, opts)?;
    let der = bundle.serialize();
    let der_pad = eight_byte_pad(der.len());
    let block_len = (der.len() + 8 + der_pad) as u32;

    out.extend_from_slice(&block_len.to_le_bytes());
    out.extend_from_slice(&pe::WIN_CERT_REVISION_2.to_le_bytes());
    out.extend_from_slice(&pe::WIN_CERT_TYPE_PKCS_SIGNED_DATA.to_le_bytes());
    out.extend_from_slice(&der);
    out.extend_from_slice(&vec![0u8; der_pad]);

    let dir = ctx.cert_dir_offset();
    put_u32_le(&mut out, dir, image_end as u32);
    put_u32_le(&mut out, dir + 4, block_len);
    pe::update_checksum(&mut out, ctx.checksum_offset());
    Ok(out)
}

fn sign_cab(data: &[u8], material: &KeyMaterial, opts: &SignOptions) -> SignResult<Vec<u8>> {
    let ctx = cab::CabContext::parse(data)?;

    let mut sink = HashingSink::new(opts.digest_alg, Vec::with_capacity(data.len() + 4096));
    cab::stream_image(&mut sink, data, &ctx)?;
    let (digest, mut out) = sink.finish();

    let bundle = build_bundle(FileKind::Cab, &digest, material, opts)?;
    let der = bundle.serialize();
    let der_pad = eight_byte_pad(der.len());

    out.extend_from_slice(&der);
    out.extend_from_slice(&vec![0u8; der_pad]);
    put_u32_le(
        &mut out,
        cab::SIGNATURE_LEN_OFFSET,
        (der.len() + der_pad) as u32,
    );
    Ok(out)
}

fn sign_msi(data: &[u8], material: &KeyMaterial, opts: &SignOptions) -> SignResult<Vec<u8>> {
    let mut input = msi::open_in_memory(data)?;
    let mut output = CompoundFile::create(Cursor::new(Vec::new()))
        .map_err(|e| SignError::Msi(format!("failed to create output: {e}")))?;

    let mut hasher = opts.digest_alg.new_hasher();
    msi::stream_image(&mut input, &mut output, &mut hasher)?;
    let digest = hasher.finalize().to_vec();

    let bundle = build_bundle(FileKind::Msi, &digest, material, opts)?;
    let der = bundle.serialize();

    let mut stream = output
        .create_stream(format!("/{}", msi::DIGITAL_SIGNATURE))
        .map_err(|e| SignError::Msi(format!("failed to create signature stream: {e}")))?;
    stream.write_all(&der)?;
    stream.flush()?;
    drop(stream);
    output
        .flush()
        .map_err(|e| SignError::Msi(format!("failed to flush output: {e}")))?;
    Ok(output.into_inner().into_inner())
}

/// Regenerate a PE image with the signature, checksum and certificate-table
/// entry stripped, then restore a valid checksum.
pub fn remove_signature(data: &[u8]) -> SignResult<Vec<u8>> {
    let ctx = pe::PeContext::parse(data)?;
    if ctx.sig_offset == 0 {
        return Err(SignError::NoSignaturePresent);
    }

    let mut sink = HashingSink::new(DigestAlgorithm::default(), Vec::with_capacity(data.len()));
    let mut image_end = ctx.image_end(data.len());
    pe::stream_image(&mut sink, data, &ctx, image_end)?;
    let pad = eight_byte_pad(image_end);
    if pad > 0 {
        sink.write(&vec![0u8; pad])?;
        image_end += pad;
    }
    let (_, mut out) = sink.finish();
    pe::update_checksum(&mut out, ctx.checksum_offset());
    Ok(out)
}

/// The raw signature block, including the `WIN_CERTIFICATE` header.
pub fn extract_signature(data: &[u8]) -> SignResult<Vec<u8>> {
    let ctx = pe::PeContext::parse(data)?;
    if ctx.sig_offset == 0 {
        return Err(SignError::NoSignaturePresent);
    }
    let start = ctx.sig_offset as usize;
    let end = start + ctx.sig_length as usize;
    Ok(data[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::tests::test_material;

    fn test_pe() -> Vec<u8> {
        let mut data = vec![0u8; 1024];
        data[0] = b'M';
        data[1] = b'Z';
        put_u32_le(&mut data, 60, 128);
        data[128..132].copy_from_slice(b"PE\0\0");
        data[152] = 0x0b;
        data[153] = 0x01;
        put_u32_le(&mut data, 128 + 116, 16);
        // store a valid checksum so remove() reproduces the file exactly
        pe::update_checksum(&mut data, 128 + 88);
        data
    }

    #[test]
    fn jp_medium_and_high_are_rejected() {
        let material = test_material();
        for (level, name) in [
            (JavaPermissionLevel::Medium, "medium"),
            (JavaPermissionLevel::High, "high"),
        ] {
            let opts = SignOptions {
                java_level: Some(level),
                ..Default::default()
            };
            match sign_file(&test_pe(), &material, &opts) {
                Err(SignError::UnsupportedJpLevel(l)) => assert_eq!(l, name),
                other => panic!("expected UnsupportedJpLevel, got {other:?}"),
            }
        }
    }

    #[test]
    fn signed_pe_has_cert_table_at_end() {
        let material = test_material();
        let opts = SignOptions {
            digest_alg: DigestAlgorithm::Sha256,
            ..Default::default()
        };
        let data = test_pe();
        let signed = sign_file(&data, &material, &opts).unwrap();

        let ctx = pe::PeContext::parse(&signed).unwrap();
        assert!(ctx.sig_offset as usize >= data.len());
        assert_eq!(
            ctx.sig_offset as usize + ctx.sig_length as usize,
            signed.len()
        );
        // WIN_CERTIFICATE header fields
        let pos = ctx.sig_offset as usize;
        assert_eq!(
            crate::format::get_u32_le(&signed, pos) as usize,
            ctx.sig_length as usize
        );
        assert_eq!(crate::format::get_u16_le(&signed, pos + 4), 0x0200);
        assert_eq!(crate::format::get_u16_le(&signed, pos + 6), 0x0002);
        // stored checksum is valid for the final bytes
        let stored = crate::format::get_u32_le(&signed, ctx.checksum_offset());
        assert_eq!(stored, pe::calc_checksum(&signed, ctx.checksum_offset()));
    }

    #[test]
    fn remove_round_trips_to_original() {
        let material = test_material();
        let opts = SignOptions::default();
        let data = test_pe(); // already 8-byte aligned
        let signed = sign_file(&data, &material, &opts).unwrap();
        let removed = remove_signature(&signed).unwrap();
        // identical except the checksum field, which matches the original's
        assert_eq!(removed, data);
    }

    #[test]
    fn extract_returns_the_win_certificate_block() {
        let material = test_material();
        let signed = sign_file(&test_pe(), &material, &SignOptions::default()).unwrap();
        let ctx = pe::PeContext::parse(&signed).unwrap();
        let block = extract_signature(&signed).unwrap();
        assert_eq!(block.len(), ctx.sig_length as usize);
        assert_eq!(&block[..4], &(block.len() as u32).to_le_bytes());
    }

    #[test]
    fn unsigned_pe_has_nothing_to_extract() {
        assert!(matches!(
            extract_signature(&test_pe()),
            Err(SignError::NoSignaturePresent)
        ));
        assert!(matches!(
            remove_signature(&test_pe()),
            Err(SignError::NoSignaturePresent)
        ));
    }

    #[test]
    fn signed_cab_layout() {
        let material = test_material();
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(b"MSCF");
        put_u32_le(&mut data, 8, 64);
        put_u32_le(&mut data, 16, 44);
        let signed = sign_file(&data, &material, &SignOptions::default()).unwrap();

        assert_eq!(signed[0x1e], 0x04); // RESERVE_PRESENT
        assert_eq!(crate::format::get_u32_le(&signed, 8), 64 + 24);
        let blob_len = crate::format::get_u32_le(&signed, cab::SIGNATURE_LEN_OFFSET) as usize;
        assert_eq!(blob_len % 8, 0);
        assert_eq!(signed.len(), 64 + 24 + blob_len);
    }

    #[test]
    fn signed_msi_gains_signature_stream() {
        use std::io::Read;

        let mut comp = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        comp.create_stream("/Payload")
            .unwrap()
            .write_all(b"contents")
            .unwrap();
        comp.flush().unwrap();
        let data = comp.into_inner().into_inner();

        let material = test_material();
        let signed = sign_file(&data, &material, &SignOptions::default()).unwrap();

        let mut out = CompoundFile::open(Cursor::new(signed)).unwrap();
        assert!(out.exists("/Payload"));
        let mut der = Vec::new();
        out.open_stream(format!("/{}", msi::DIGITAL_SIGNATURE))
            .unwrap()
            .read_to_end(&mut der)
            .unwrap();
        // the stream holds the raw bundle, no WIN_CERTIFICATE framing
        let parsed = crate::pkcs7::parse_signed_data(&der).unwrap();
        assert_eq!(parsed.signer_infos.len(), 1);
    }
}
