//! Authenticode signing library.
//!
//! Applies, removes, extracts and verifies Microsoft Authenticode signatures
//! on PE images, CAB archives and MSI compound files, with optional
//! Authenticode or RFC 3161 timestamping.

pub mod asn1;
pub mod error;
pub mod format;
pub mod keys;
pub mod pkcs7;
pub mod sign;
pub mod sink;
pub mod spc;
pub mod timestamp;
pub mod verify;

pub use error::{SignError, SignResult};
pub use format::FileKind;
pub use keys::KeyMaterial;
pub use sign::{JavaPermissionLevel, SignOptions};
pub use timestamp::TimestampMode;

use digest::DynDigest;

/// Digest algorithms accepted for the Authenticode file hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        DigestAlgorithm::Sha1
    }
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 16,
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
        }
    }

    /// Body octets of the algorithm OID (without tag and length).
    pub fn oid_body(&self) -> &'static [u8] {
        match self {
            // 1.2.840.113549.2.5
            DigestAlgorithm::Md5 => &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05],
            // 1.3.14.3.2.26
            DigestAlgorithm::Sha1 => &[0x2b, 0x0e, 0x03, 0x02, 0x1a],
            // 2.16.840.1.101.3.4.2.1
            DigestAlgorithm::Sha256 => &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01],
        }
    }

    /// Resolve an algorithm from OID body octets found in a signature.
    pub fn from_oid_body(body: &[u8]) -> Option<Self> {
        [
            DigestAlgorithm::Md5,
            DigestAlgorithm::Sha1,
            DigestAlgorithm::Sha256,
        ]
        .into_iter()
        .find(|alg| alg.oid_body() == body)
    }

    pub fn new_hasher(&self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Md5 => Box::new(md5::Md5::default()),
            DigestAlgorithm::Sha1 => Box::new(sha1::Sha1::default()),
            DigestAlgorithm::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }

    pub fn message_digest(&self) -> openssl::hash::MessageDigest {
        match self {
            DigestAlgorithm::Md5 => openssl::hash::MessageDigest::md5(),
            DigestAlgorithm::Sha1 => openssl::hash::MessageDigest::sha1(),
            DigestAlgorithm::Sha256 => openssl::hash::MessageDigest::sha256(),
        }
    }

    /// One-shot digest of a byte slice.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.new_hasher();
        hasher.update(data);
        hasher.finalize().to_vec()
    }
}
