//! PEM/DER encoding of credentials
//!
//! File format: the end-entity certificate, then the private key (optional,
//! optionally encrypted), then the chain certificates, all PEM, concatenated.
//! The same bytes are used as file content and as a transfer buffer.
//!
//! Encrypted keys are PKCS#8 with PBES2 (PBKDF2-SHA256, AES-256-CBC).
//! Unencrypted keys are written as PKCS#8; PKCS#1 `RSA PRIVATE KEY` blocks
//! are accepted on input.

use crate::credentials::CredentialContainer;
use crate::error::{ProxyError, Result};
use crate::key::PrivateKey;
use der::{Decode, Encode, EncodePem, Reader, SliceReader};
use pkcs8::pkcs5::pbes2;
use pkcs8::{EncryptedPrivateKeyInfo, LineEnding, PrivateKeyInfo};
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::RsaPrivateKey;
use x509_cert::request::CertReq;
use x509_cert::Certificate;
use zeroize::Zeroizing;

/// PEM label of a certificate
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// PEM label of an unencrypted PKCS#8 key
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// PEM label of an encrypted PKCS#8 key
pub const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";

/// PEM label of a PKCS#1 RSA key
pub const RSA_PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";

const CERTIFICATE_REQUEST_LABELS: [&str; 2] = ["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

/// PBKDF2 iteration count for encrypted keys
pub const PBKDF2_ITERATIONS: u32 = 2048;

enum Block {
    Certificate(Box<Certificate>),
    Key {
        label: String,
        legacy_encrypted: bool,
        der: Zeroizing<Vec<u8>>,
    },
}

struct RawBlock {
    label: String,
    legacy_encrypted: bool,
    contents: Zeroizing<Vec<u8>>,
}

/// Decode PEM framing; every block's bytes are wiped on drop from here on
fn raw_blocks(input: &[u8]) -> Result<Vec<RawBlock>> {
    let blocks: Vec<RawBlock> = pem::parse_many(input)?
        .into_iter()
        .map(|block| RawBlock {
            label: block.tag().to_string(),
            legacy_encrypted: block
                .headers()
                .get("Proc-Type")
                .map_or(false, |value| value.contains("ENCRYPTED")),
            contents: Zeroizing::new(block.into_contents()),
        })
        .collect();

    if blocks.is_empty() {
        return Err(ProxyError::Parse("No PEM blocks found".to_string()));
    }
    Ok(blocks)
}

fn split_blocks(input: &[u8]) -> Result<Vec<Block>> {
    raw_blocks(input)?
        .into_iter()
        .map(|raw| {
            let RawBlock {
                label,
                legacy_encrypted,
                contents,
            } = raw;
            match label.as_str() {
                CERTIFICATE_LABEL => Ok(Block::Certificate(Box::new(Certificate::from_der(
                    &contents,
                )?))),
                PRIVATE_KEY_LABEL | ENCRYPTED_PRIVATE_KEY_LABEL | RSA_PRIVATE_KEY_LABEL => {
                    Ok(Block::Key {
                        label,
                        legacy_encrypted,
                        der: contents,
                    })
                }
                other => Err(ProxyError::Parse(format!(
                    "Unexpected PEM block '{}'",
                    other
                ))),
            }
        })
        .collect()
}

/// Decode a credential (certificate, optional key, chain) from PEM
pub fn decode_credentials(input: &[u8], passphrase: Option<&[u8]>) -> Result<CredentialContainer> {
    let mut certificates = Vec::new();
    let mut key = None;

    for block in split_blocks(input)? {
        match block {
            Block::Certificate(cert) => certificates.push(*cert),
            Block::Key {
                label,
                legacy_encrypted,
                der,
            } => {
                if key.is_some() {
                    return Err(ProxyError::Parse(
                        "More than one private key in credential".to_string(),
                    ));
                }
                key = Some(decode_key_block(&label, legacy_encrypted, &der, passphrase)?);
            }
        }
    }

    let mut certificates = certificates.into_iter();
    let certificate = certificates
        .next()
        .ok_or_else(|| ProxyError::Parse("Credential contains no certificate".to_string()))?;

    CredentialContainer::from_parts(certificate, key, certificates.collect())
}

/// Encode a credential as PEM, encrypting the key when a passphrase is given
pub fn encode_credentials(
    container: &CredentialContainer,
    passphrase: Option<&[u8]>,
) -> Result<Zeroizing<String>> {
    let mut out = Zeroizing::new(certificate_to_pem(container.certificate())?);

    if let Some(key) = container.private_key() {
        out.push_str(&encode_private_key(key, passphrase)?);
    }

    for cert in container.chain() {
        out.push_str(&certificate_to_pem(cert)?);
    }

    Ok(out)
}

/// Encode one certificate as PEM
pub fn certificate_to_pem(cert: &Certificate) -> Result<String> {
    Ok(cert.to_pem(LineEnding::LF)?)
}

/// Decode every `CERTIFICATE` block, rejecting any other block
pub fn certificates_from_pem(input: &[u8]) -> Result<Vec<Certificate>> {
    split_blocks(input)?
        .into_iter()
        .map(|block| match block {
            Block::Certificate(cert) => Ok(*cert),
            Block::Key { .. } => Err(ProxyError::Parse(
                "Expected only certificates, found a private key".to_string(),
            )),
        })
        .collect()
}

/// Certificates of a credential, skipping (and not decrypting) any key
pub fn credential_certificates(input: &[u8]) -> Result<Vec<Certificate>> {
    let certificates: Vec<Certificate> = split_blocks(input)?
        .into_iter()
        .filter_map(|block| match block {
            Block::Certificate(cert) => Some(*cert),
            Block::Key { .. } => None,
        })
        .collect();

    if certificates.is_empty() {
        return Err(ProxyError::Parse("Credential contains no certificate".to_string()));
    }
    Ok(certificates)
}

/// Concatenate certificates as DER
pub fn creds_to_buffer(certificates: &[Certificate]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for cert in certificates {
        cert.encode_to_vec(&mut out)?;
    }
    Ok(out)
}

/// Split concatenated DER certificates
pub fn creds_from_buffer(input: &[u8]) -> Result<Vec<Certificate>> {
    if input.is_empty() {
        return Err(ProxyError::Parse("Empty certificate buffer".to_string()));
    }

    let mut reader = SliceReader::new(input)?;
    let mut certificates = Vec::new();
    while !reader.is_finished() {
        certificates.push(reader.decode::<Certificate>()?);
    }
    Ok(certificates)
}

/// Convert a PEM certificate request to DER, checking that it parses
pub fn certreq_pem_to_der(input: &[u8]) -> Result<Vec<u8>> {
    let block = pem::parse(input)?;
    if !CERTIFICATE_REQUEST_LABELS.contains(&block.tag()) {
        return Err(ProxyError::Parse(format!(
            "Expected a certificate request, found '{}'",
            block.tag()
        )));
    }

    CertReq::from_der(block.contents())?;
    Ok(block.into_contents())
}

/// Encode a private key as PEM
pub fn encode_private_key(key: &PrivateKey, passphrase: Option<&[u8]>) -> Result<Zeroizing<String>> {
    let plain = key
        .as_rsa()
        .to_pkcs8_der()
        .map_err(|e| ProxyError::Parse(format!("Failed to encode private key: {}", e)))?;

    let Some(passphrase) = passphrase else {
        return Ok(plain.to_pem(PRIVATE_KEY_LABEL, LineEnding::LF)?);
    };

    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(PBKDF2_ITERATIONS, &salt, &iv)
        .map_err(|e| ProxyError::Parse(format!("Invalid key encryption parameters: {}", e)))?;

    let info = PrivateKeyInfo::try_from(plain.as_bytes())
        .map_err(|e| ProxyError::Parse(format!("Failed to encode private key: {}", e)))?;
    let encrypted = info
        .encrypt_with_params(params, passphrase)
        .map_err(|e| ProxyError::Parse(format!("Failed to encrypt private key: {}", e)))?;

    Ok(encrypted.to_pem(ENCRYPTED_PRIVATE_KEY_LABEL, LineEnding::LF)?)
}

/// Decode a PEM private key
pub fn decode_private_key(input: &[u8], passphrase: Option<&[u8]>) -> Result<PrivateKey> {
    let mut found = None;
    for block in split_blocks(input)? {
        if let Block::Key {
            label,
            legacy_encrypted,
            der,
        } = block
        {
            found = Some(decode_key_block(&label, legacy_encrypted, &der, passphrase)?);
            break;
        }
    }

    found.ok_or_else(|| ProxyError::Parse("No private key found".to_string()))
}

/// Whether the first private key in `input` is passphrase protected
pub fn is_encrypted_key(input: &[u8]) -> Result<bool> {
    split_blocks(input)?
        .into_iter()
        .find_map(|block| match block {
            Block::Key {
                label,
                legacy_encrypted,
                ..
            } => Some(label == ENCRYPTED_PRIVATE_KEY_LABEL || legacy_encrypted),
            Block::Certificate(_) => None,
        })
        .ok_or_else(|| ProxyError::Parse("No private key found".to_string()))
}

fn decode_key_block(
    label: &str,
    legacy_encrypted: bool,
    der: &[u8],
    passphrase: Option<&[u8]>,
) -> Result<PrivateKey> {
    if legacy_encrypted {
        return Err(ProxyError::Parse(
            "Unsupported key format: OpenSSL Proc-Type encryption; convert to PKCS#8".to_string(),
        ));
    }

    let rsa = match label {
        ENCRYPTED_PRIVATE_KEY_LABEL => {
            let passphrase = passphrase.ok_or_else(|| {
                ProxyError::Decrypt("Private key is encrypted and no passphrase given".to_string())
            })?;
            let info = EncryptedPrivateKeyInfo::try_from(der)
                .map_err(|e| ProxyError::Parse(format!("Malformed encrypted key: {}", e)))?;
            let plain = info
                .decrypt(passphrase)
                .map_err(|_| ProxyError::Decrypt("Wrong passphrase".to_string()))?;
            RsaPrivateKey::from_pkcs8_der(plain.as_bytes())
                .map_err(|_| ProxyError::Decrypt("Wrong passphrase".to_string()))?
        }
        RSA_PRIVATE_KEY_LABEL => RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| ProxyError::Parse(format!("Malformed RSA private key: {}", e)))?,
        _ => RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| ProxyError::Parse(format!("Malformed private key: {}", e)))?,
    };

    Ok(PrivateKey::from_rsa(rsa))
}
