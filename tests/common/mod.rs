//! Shared fixtures: a throwaway signing identity and minimal container
//! images for each supported format.
#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};

use authsign::KeyMaterial;

/// Self-signed RSA-2048 certificate and key.
pub fn test_material() -> KeyMaterial {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "Authsign Test Publisher")
        .unwrap();
    name.append_entry_by_text("O", "Authsign Tests").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(0xbeef).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(7).unwrap())
        .unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    KeyMaterial {
        cert: Some(builder.build()),
        chain: Vec::new(),
        key,
    }
}

fn put_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn get_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

pub fn get_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Minimal unsigned PE32 image: DOS stub, headers, 16 data directories and
/// some body bytes, 8-byte aligned, with a valid checksum.
pub fn test_pe_image() -> Vec<u8> {
    let mut data = vec![0u8; 2048];
    data[0] = b'M';
    data[1] = b'Z';
    put_u32_le(&mut data, 60, 128);
    data[128..132].copy_from_slice(b"PE\0\0");
    data[132] = 0x4c; // i386
    data[133] = 0x01;
    data[152] = 0x0b; // PE32 magic
    data[153] = 0x01;
    put_u32_le(&mut data, 128 + 116, 16); // NumberOfRvaAndSizes
    for (i, byte) in data[512..1536].iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }

    // valid stored checksum
    let checksum = pe_checksum(&data, 128 + 88);
    put_u32_le(&mut data, 128 + 88, checksum);
    data
}

/// Reference PE checksum, written independently of the implementation.
pub fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let mut sum: u32 = 0;
    let mut offset = 0usize;
    while offset + 1 < data.len() {
        if offset != checksum_offset && offset != checksum_offset + 2 {
            sum = sum.wrapping_add(u32::from(get_u16_le(data, offset)));
            sum = 0xffff & (sum + (sum >> 16));
        }
        offset += 2;
    }
    sum = 0xffff & (sum + (sum >> 16));
    sum.wrapping_add(offset as u32)
}

/// Minimal cabinet: `MSCF` header, no folders, files offset 44.
pub fn test_cab_image() -> Vec<u8> {
    let mut data = vec![0u8; 96];
    data[0..4].copy_from_slice(b"MSCF");
    put_u32_le(&mut data, 8, 96); // cbCabinet
    put_u32_le(&mut data, 16, 44); // coffFiles
    data[24] = 3;
    data[25] = 1;
    data
}
