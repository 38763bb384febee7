//! Timestamp counter-signatures.
//!
//! Two protocols: the proprietary Authenticode exchange (base64 body over
//! plain HTTP POST) and RFC 3161. Both take the signer's encrypted digest,
//! query the authority once, and install the reply on the signed bundle as
//! an unsigned attribute.

use base64::Engine;

use crate::asn1::{self, Reader};
use crate::error::{SignError, SignResult};
use crate::pkcs7::{parse_signed_data, SignedBundle};
use crate::spc::{self, oids};
use crate::DigestAlgorithm;

/// Which timestamp protocol to speak, with the authority URL.
#[derive(Debug, Clone)]
pub enum TimestampMode {
    Authenticode(String),
    Rfc3161(String),
}

pub struct Timestamper {
    client: reqwest::blocking::Client,
}

impl Timestamper {
    pub fn new(proxy: Option<&str>) -> SignResult<Self> {
        let mut builder = reqwest::blocking::Client::builder().user_agent("Transport");
        if let Some(proxy) = proxy {
            builder = builder.proxy(
                reqwest::Proxy::all(proxy)
                    .map_err(|e| SignError::TimestampTransport(format!("bad proxy: {e}")))?,
            );
        }
        Ok(Timestamper {
            client: builder.build()?,
        })
    }

    /// Acquire and install the counter-signature for the requested mode.
    pub fn timestamp(&self, mode: &TimestampMode, bundle: &mut SignedBundle) -> SignResult<()> {
        match mode {
            TimestampMode::Authenticode(url) => self.authenticode(url, bundle),
            TimestampMode::Rfc3161(url) => self.rfc3161(url, bundle),
        }
    }

    /// Authenticode timestamping: POST a base64 `TimeStampRequest`, decode
    /// the base64 PKCS#7 reply, install its first `SignerInfo` as a
    /// pkcs9-countersignature and its certificates (reversed).
    fn authenticode(&self, url: &str, bundle: &mut SignedBundle) -> SignResult<()> {
        let request = authenticode_request(bundle.encrypted_digest());
        let body = fold_base64(&base64::engine::general_purpose::STANDARD.encode(&request));
        log::info!("requesting Authenticode timestamp from {url}");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/octet-stream")
            .header("Accept", "application/octet-stream")
            .header("Cache-Control", "no-cache")
            .body(body)
            .send()?;
        if !response.status().is_success() {
            return Err(SignError::TimestampTransport(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }
        let reply = response.bytes()?;

        // Servers answer either NL-folded or single-line base64.
        let blob_has_nl = reply.contains(&b'\n');
        let filtered: Vec<u8> = if blob_has_nl {
            reply
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect()
        } else {
            reply.to_vec()
        };
        let der = base64::engine::general_purpose::STANDARD
            .decode(&filtered)
            .map_err(|e| SignError::TimestampFormat(format!("bad base64 reply: {e}")))?;

        let parsed = parse_signed_data(&der)
            .map_err(|e| SignError::TimestampFormat(format!("bad timestamp reply: {e}")))?;
        bundle.add_certificates_reversed(parsed.certificates);
        bundle.add_unsigned_attribute(oids::PKCS9_COUNTERSIGNATURE, &parsed.signer_infos[0]);
        Ok(())
    }

    /// RFC 3161 timestamping: binary `TimeStampReq` over
    /// application/timestamp-query, reply token attached verbatim.
    fn rfc3161(&self, url: &str, bundle: &mut SignedBundle) -> SignResult<()> {
        let request = rfc3161_request(bundle.encrypted_digest(), bundle.digest_alg());
        log::info!("requesting RFC 3161 timestamp from {url}");

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/timestamp-query")
            .header("Accept", "application/timestamp-reply")
            .header("Cache-Control", "no-cache")
            .body(request)
            .send()?;
        if !response.status().is_success() {
            return Err(SignError::TimestampTransport(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }
        let reply = response.bytes()?;

        let token = parse_rfc3161_response(&reply)?;
        bundle.add_unsigned_attribute(oids::TIMESTAMP_TOKEN, &token);
        Ok(())
    }
}

/// Authenticode `TimeStampRequest`: the signature octets are borrowed only
/// for emission; the request owns nothing beyond its own buffer.
pub fn authenticode_request(signature: &[u8]) -> Vec<u8> {
    let blob = asn1::seq(
        &[
            asn1::oid(oids::PKCS7_DATA),
            asn1::context_explicit(0, &asn1::octet_string(signature)),
        ]
        .concat(),
    );
    asn1::seq(&[asn1::oid(oids::SPC_TIME_STAMP_REQUEST), blob].concat())
}

/// RFC 3161 `TimeStampReq` over the digest of the signature octets.
pub fn rfc3161_request(signature: &[u8], alg: DigestAlgorithm) -> Vec<u8> {
    let imprint = asn1::seq(
        &[
            spc::algorithm_identifier(alg.oid_body()),
            asn1::octet_string(&alg.hash(signature)),
        ]
        .concat(),
    );
    let mut content = asn1::integer(1);
    content.extend_from_slice(&imprint);
    content.extend_from_slice(&[0x01, 0x01, 0xff]); // certReq TRUE
    asn1::seq(&content)
}

/// Parse a `TimeStampResp`, returning the raw token element when the status
/// is granted.
pub fn parse_rfc3161_response(der: &[u8]) -> SignResult<Vec<u8>> {
    let mut reader = Reader::new(der);
    let resp = reader
        .expect(asn1::TAG_SEQUENCE)
        .map_err(|e| SignError::TimestampFormat(e.to_string()))?;
    let mut fields = resp.reader();
    let status_info = fields
        .expect(asn1::TAG_SEQUENCE)
        .map_err(|e| SignError::TimestampFormat(e.to_string()))?;
    let status = status_info
        .reader()
        .expect(asn1::TAG_INTEGER)
        .map_err(|e| SignError::TimestampFormat(e.to_string()))?;

    let mut value: i64 = 0;
    for &b in status.content {
        value = (value << 8) | i64::from(b);
    }
    if value != 0 {
        return Err(SignError::TimestampRejected(value));
    }

    let token = fields
        .read()
        .map_err(|_| SignError::TimestampFormat("granted response without token".into()))?;
    Ok(token.raw.to_vec())
}

/// Fold a base64 string at 64 columns with a trailing newline, the framing
/// the reference transport emits.
fn fold_base64(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 64 + 2);
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticode_request_layout() {
        let der = authenticode_request(&[0xaa; 4]);
        let mut reader = Reader::new(&der);
        let outer = reader.expect(asn1::TAG_SEQUENCE).unwrap();
        let mut fields = outer.reader();
        assert_eq!(
            fields.expect(asn1::TAG_OID).unwrap().content,
            oids::SPC_TIME_STAMP_REQUEST
        );
        let blob = fields.expect(asn1::TAG_SEQUENCE).unwrap();
        let mut blob_fields = blob.reader();
        assert_eq!(
            blob_fields.expect(asn1::TAG_OID).unwrap().content,
            oids::PKCS7_DATA
        );
        let sig = blob_fields.expect(0xa0).unwrap();
        assert_eq!(
            sig.reader().expect(asn1::TAG_OCTET_STRING).unwrap().content,
            &[0xaa; 4]
        );
    }

    #[test]
    fn rfc3161_request_layout() {
        let signature = [0x5au8; 8];
        let der = rfc3161_request(&signature, DigestAlgorithm::Sha256);
        let mut fields = Reader::new(&der)
            .expect(asn1::TAG_SEQUENCE)
            .unwrap()
            .reader();
        assert_eq!(fields.expect(asn1::TAG_INTEGER).unwrap().content, &[0x01]);
        let imprint = fields.expect(asn1::TAG_SEQUENCE).unwrap();
        let mut imprint_fields = imprint.reader();
        let alg = imprint_fields.expect(asn1::TAG_SEQUENCE).unwrap();
        assert_eq!(
            alg.reader().expect(asn1::TAG_OID).unwrap().content,
            DigestAlgorithm::Sha256.oid_body()
        );
        assert_eq!(
            imprint_fields
                .expect(asn1::TAG_OCTET_STRING)
                .unwrap()
                .content,
            DigestAlgorithm::Sha256.hash(&signature).as_slice()
        );
        // certReq TRUE closes the request
        assert_eq!(&der[der.len() - 3..], &[0x01, 0x01, 0xff]);
    }

    #[test]
    fn rfc3161_response_status_handling() {
        // status 0 with a minimal token
        let token = asn1::seq(&asn1::oid(oids::PKCS7_SIGNED_DATA));
        let ok = asn1::seq(&[asn1::seq(&asn1::integer(0)), token.clone()].concat());
        assert_eq!(parse_rfc3161_response(&ok).unwrap(), token);

        // rejection status propagates the value
        let rejected = asn1::seq(&asn1::seq(&asn1::integer(2)));
        assert!(matches!(
            parse_rfc3161_response(&rejected),
            Err(SignError::TimestampRejected(2))
        ));

        // granted but missing token
        let empty = asn1::seq(&asn1::seq(&asn1::integer(0)));
        assert!(matches!(
            parse_rfc3161_response(&empty),
            Err(SignError::TimestampFormat(_))
        ));
    }

    #[test]
    fn base64_folding() {
        let folded = fold_base64(&"A".repeat(100));
        let lines: Vec<&str> = folded.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 64);
        assert_eq!(lines[1].len(), 36);
        assert!(folded.ends_with('\n'));
    }
}
