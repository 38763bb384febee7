//! Error types and result alias for signing operations.

use thiserror::Error;

/// Result type used throughout the crate
pub type SignResult<T> = Result<T, SignError>;

/// Error taxonomy; every variant corresponds to a distinct failure path
/// surfaced by the command-line front end.
#[derive(Error, Debug)]
pub enum SignError {
    #[error("{0}")]
    Arg(String),

    #[error("unrecognized file type - file is too short")]
    FileTooShort,

    #[error("unrecognized file type")]
    UnknownFormat,

    #[error("cannot sign cab files with flag bits set")]
    CabFlagsUnsupported,

    #[error("corrupt PE file - found unknown magic {0:#06x}")]
    PeUnknownMagic(u16),

    #[error("cannot handle PE files without certificate table resource")]
    PeMissingCertDir,

    #[error("corrupt PE file - current signature not at end of file")]
    PeSignatureNotAtEnd,

    #[error("corrupt PE file: {0}")]
    PeFormat(String),

    #[error("file does not have any signature")]
    NoSignaturePresent,

    #[error("failed to load key material: {0}")]
    KeyLoad(String),

    #[error("no certificate in the chain matches the private key")]
    SignerSelection,

    #[error("java permission level '{0}' is reserved and cannot be signed")]
    UnsupportedJpLevel(String),

    #[error("timestamp transport failed: {0}")]
    TimestampTransport(String),

    #[error("malformed timestamp reply: {0}")]
    TimestampFormat(String),

    #[error("timestamping failed: status {0}")]
    TimestampRejected(i64),

    #[error("ASN.1 error: {0}")]
    Asn1(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("MSI error: {0}")]
    Msi(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SignError {
    fn from(e: std::io::Error) -> Self {
        SignError::Io(e.to_string())
    }
}

impl From<openssl::error::ErrorStack> for SignError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        SignError::Crypto(e.to_string())
    }
}

impl From<reqwest::Error> for SignError {
    fn from(e: reqwest::Error) -> Self {
        SignError::TimestampTransport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let e = SignError::UnsupportedJpLevel("medium".into());
        assert!(e.to_string().contains("medium"));

        let e = SignError::TimestampRejected(2);
        assert!(e.to_string().contains("status 2"));
    }
}
