//! Key-material loaders: PKCS#12 containers, DER SPC certificate bags with
//! DER/PEM private keys, and unencrypted PVK files.
//!
//! Each loader resolves to the `(cert, chain, key)` triple the signer
//! consumes; wrong passwords and malformed containers surface as
//! `KeyLoad` errors.

use std::path::Path;

use openssl::bn::BigNum;
use openssl::pkcs12::Pkcs12;
use openssl::pkcs7::Pkcs7;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::X509;

use crate::error::{SignError, SignResult};
use crate::format::get_u32_le;

/// Certificate chain and private key selected for signing.
pub struct KeyMaterial {
    /// End-entity certificate, when the container distinguishes one.
    pub cert: Option<X509>,
    pub chain: Vec<X509>,
    pub key: PKey<Private>,
}

/// Load a PKCS#12 container.
pub fn load_pkcs12(path: &Path, pass: &str) -> SignResult<KeyMaterial> {
    let der = std::fs::read(path)
        .map_err(|e| SignError::KeyLoad(format!("{}: {e}", path.display())))?;
    let p12 = Pkcs12::from_der(&der)
        .map_err(|_| SignError::KeyLoad(format!("{} is not a PKCS#12 file", path.display())))?;
    let parsed = p12.parse2(pass).map_err(|_| {
        SignError::KeyLoad(format!("{} (wrong password?)", path.display()))
    })?;

    let key = parsed
        .pkey
        .ok_or_else(|| SignError::KeyLoad("PKCS#12 container holds no private key".into()))?;
    let chain = parsed
        .ca
        .map(|stack| stack.into_iter().collect())
        .unwrap_or_default();
    Ok(KeyMaterial {
        cert: parsed.cert,
        chain,
        key,
    })
}

/// Certificates from a DER SPC file (a PKCS#7 certificate bag).
fn load_spc_chain(path: &Path) -> SignResult<Vec<X509>> {
    let der = std::fs::read(path)
        .map_err(|e| SignError::KeyLoad(format!("{}: {e}", path.display())))?;
    let p7 = Pkcs7::from_der(&der).map_err(|_| {
        SignError::KeyLoad(format!("{} is not a DER-encoded spc file", path.display()))
    })?;
    let certs = p7
        .signed()
        .and_then(|signed| signed.certificates())
        .map(|stack| stack.iter().map(|c| c.to_owned()).collect::<Vec<_>>())
        .unwrap_or_default();
    if certs.is_empty() {
        return Err(SignError::KeyLoad(format!(
            "{} contains no certificates",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load an SPC certificate bag together with a DER or PEM private key.
pub fn load_spc_key(spc_path: &Path, key_path: &Path, pass: &str) -> SignResult<KeyMaterial> {
    let chain = load_spc_chain(spc_path)?;
    let key_bytes = std::fs::read(key_path)
        .map_err(|e| SignError::KeyLoad(format!("{}: {e}", key_path.display())))?;

    let key = PKey::private_key_from_der(&key_bytes)
        .or_else(|_| PKey::private_key_from_pem_passphrase(&key_bytes, pass.as_bytes()))
        .or_else(|_| PKey::private_key_from_pem(&key_bytes))
        .map_err(|_| {
            SignError::KeyLoad(format!(
                "{} (wrong password or unsupported format?)",
                key_path.display()
            ))
        })?;

    Ok(KeyMaterial {
        cert: None,
        chain,
        key,
    })
}

/// Load an SPC certificate bag together with an unencrypted PVK key.
pub fn load_spc_pvk(spc_path: &Path, pvk_path: &Path, _pass: &str) -> SignResult<KeyMaterial> {
    let chain = load_spc_chain(spc_path)?;
    let pvk_bytes = std::fs::read(pvk_path)
        .map_err(|e| SignError::KeyLoad(format!("{}: {e}", pvk_path.display())))?;
    let key = parse_pvk(&pvk_bytes)
        .map_err(|e| SignError::KeyLoad(format!("{}: {e}", pvk_path.display())))?;
    Ok(KeyMaterial {
        cert: None,
        chain,
        key,
    })
}

const PVK_MAGIC: u32 = 0xb0b5_4590;
const RSA2_MAGIC: u32 = 0x3241_5352; // "RSA2"

/// Little-endian magnitude to an OpenSSL big number.
fn bn_from_le(bytes: &[u8]) -> SignResult<BigNum> {
    let mut be = bytes.to_vec();
    be.reverse();
    Ok(BigNum::from_slice(&be)?)
}

/// Parse a PVK file holding an unencrypted MS PRIVATEKEYBLOB.
fn parse_pvk(data: &[u8]) -> Result<PKey<Private>, String> {
    if data.len() < 24 || get_u32_le(data, 0) != PVK_MAGIC {
        return Err("not a PVK file".into());
    }
    let encrypted = get_u32_le(data, 12);
    let salt_len = get_u32_le(data, 16) as usize;
    let key_len = get_u32_le(data, 20) as usize;
    if encrypted != 0 || salt_len != 0 {
        return Err("encrypted PVK files are not supported".into());
    }
    let blob = data
        .get(24..24 + key_len)
        .ok_or_else(|| "truncated key blob".to_string())?;

    // BLOBHEADER: bType 7 (private key), bVersion 2, then RSAPUBKEY.
    if blob.len() < 20 || blob[0] != 0x07 || blob[1] != 0x02 {
        return Err("not a private key blob".into());
    }
    if get_u32_le(blob, 8) != RSA2_MAGIC {
        return Err("not an RSA2 private key".into());
    }
    let bitlen = get_u32_le(blob, 12) as usize;
    let bytelen = bitlen / 8;
    let halflen = bitlen / 16;
    let pubexp = get_u32_le(blob, 16);

    let mut offset = 20usize;
    let mut take = |len: usize| -> Result<&[u8], String> {
        let part = blob
            .get(offset..offset + len)
            .ok_or_else(|| "truncated RSA components".to_string())?;
        offset += len;
        Ok(part)
    };

    let n = take(bytelen)?;
    let p = take(halflen)?;
    let q = take(halflen)?;
    let dmp1 = take(halflen)?;
    let dmq1 = take(halflen)?;
    let iqmp = take(halflen)?;
    let d = take(bytelen)?;

    let build = || -> SignResult<PKey<Private>> {
        let rsa = Rsa::from_private_components(
            bn_from_le(n)?,
            BigNum::from_u32(pubexp)?,
            bn_from_le(d)?,
            bn_from_le(p)?,
            bn_from_le(q)?,
            bn_from_le(dmp1)?,
            bn_from_le(dmq1)?,
            bn_from_le(iqmp)?,
        )?;
        Ok(PKey::from_rsa(rsa)?)
    };
    build().map_err(|e| e.to_string())
}
