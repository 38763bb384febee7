//! CAB signing: reserve-area insertion and header rewrites.

mod common;

use authsign::sign::sign_file;
use authsign::{JavaPermissionLevel, SignError, SignOptions};
use common::{get_u32_le, test_cab_image, test_material};

#[test]
fn signed_cab_header_rewrites() {
    let material = test_material();
    let original = test_cab_image();
    let signed = sign_file(&original, &material, &SignOptions::default()).unwrap();

    // RESERVE_PRESENT flag at 0x1e
    assert_eq!(signed[0x1e], 0x04);
    // cabinet size grew by the 24-byte reserve area
    assert_eq!(get_u32_le(&signed, 8), original.len() as u32 + 24);
    // files offset shifted likewise
    assert_eq!(get_u32_le(&signed, 16), 44 + 24);
    // signature-length slot at 0x30 covers the padded blob
    let blob_len = get_u32_le(&signed, 0x30) as usize;
    assert_eq!(blob_len % 8, 0);
    assert_eq!(signed.len(), original.len() + 24 + blob_len);
    // body preserved after the reserve area
    assert_eq!(&signed[60..original.len() + 24], &original[36..]);
}

#[test]
fn cab_with_flag_bits_is_rejected() {
    let material = test_material();
    let mut data = test_cab_image();
    data[0x1e] = 0x01;
    assert!(matches!(
        sign_file(&data, &material, &SignOptions::default()),
        Err(SignError::CabFlagsUnsupported)
    ));
}

#[test]
fn java_low_adds_the_permission_attribute() {
    let material = test_material();
    let opts = SignOptions {
        java_level: Some(JavaPermissionLevel::Low),
        ..Default::default()
    };
    let signed = sign_file(&test_cab_image(), &material, &opts).unwrap();
    // SPC_MS_JAVA OID followed by the low-permission SET value
    let needle = [
        0x06, 0x09, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x0f, 0x01, 0x31, 0x08, 0x30,
        0x06, 0x03, 0x02, 0x00, 0x01, 0x30, 0x00,
    ];
    assert!(signed.windows(needle.len()).any(|w| w == needle));
}

#[test]
fn java_level_is_ignored_for_pe_files() {
    let material = test_material();
    let opts = SignOptions {
        java_level: Some(JavaPermissionLevel::Low),
        ..Default::default()
    };
    let signed = sign_file(&common::test_pe_image(), &material, &opts).unwrap();
    let oid = [0x06, 0x09, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x0f, 0x01];
    assert!(!signed.windows(oid.len()).any(|w| w == oid));
}

#[test]
fn cab_blob_carries_the_cab_data_oid() {
    let material = test_material();
    let signed = sign_file(&test_cab_image(), &material, &SignOptions::default()).unwrap();
    let oid = [0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x19];
    assert!(signed.windows(oid.len()).any(|w| w == oid));
}
