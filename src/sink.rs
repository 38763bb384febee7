//! Hashing sink: a linear hash → output pipeline.
//!
//! The format walkers push every byte that belongs to the Authenticode
//! digest through [`HashingSink::write`], which updates the digest and
//! forwards the bytes to the output. Bytes that must reach the output but
//! stay out of the digest (zeroed checksum and certificate-table fields,
//! reserved CAB header regions) go through [`HashingSink::forward`].

use std::io::Write;

use digest::DynDigest;

use crate::error::SignResult;
use crate::DigestAlgorithm;

pub struct HashingSink<W: Write> {
    hasher: Box<dyn DynDigest>,
    out: W,
}

impl<W: Write> HashingSink<W> {
    pub fn new(alg: DigestAlgorithm, out: W) -> Self {
        HashingSink {
            hasher: alg.new_hasher(),
            out,
        }
    }

    /// Hash the bytes and forward them to the output.
    pub fn write(&mut self, data: &[u8]) -> SignResult<()> {
        self.hasher.update(data);
        self.out.write_all(data)?;
        Ok(())
    }

    /// Forward the bytes to the output without hashing them.
    pub fn forward(&mut self, data: &[u8]) -> SignResult<()> {
        self.out.write_all(data)?;
        Ok(())
    }

    /// Finish the digest and hand back the output.
    pub fn finish(self) -> (Vec<u8>, W) {
        (self.hasher.finalize().to_vec(), self.out)
    }
}

/// Digest-only sink for verification passes.
pub fn discard(alg: DigestAlgorithm) -> HashingSink<std::io::Sink> {
    HashingSink::new(alg, std::io::sink())
}
