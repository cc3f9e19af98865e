//! RSA key material
//!
//! [`PrivateKey`] is the only holder of secret key bytes in this crate. The
//! wrapped `RsaPrivateKey` zeroes its components when dropped, so releasing a
//! `PrivateKey` (including on error paths and abandoned requests) wipes it.

use crate::error::{ProxyError, Result};
use der::asn1::ObjectIdentifier;
use der::{Decode, Encode};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use zeroize::ZeroizeOnDrop;

/// Smallest modulus accepted for generated keys
pub const MIN_KEY_BITS: usize = 512;

/// Largest modulus accepted for generated keys
pub const MAX_KEY_BITS: usize = 16384;

/// sha256WithRSAEncryption
pub const SHA256_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// sha384WithRSAEncryption
pub const SHA384_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");

/// sha512WithRSAEncryption
pub const SHA512_WITH_RSA: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

/// Digest paired with RSA PKCS#1 v1.5 signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureDigest {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl SignatureDigest {
    /// Map a signature algorithm identifier to a digest
    pub fn from_algorithm(algorithm: &AlgorithmIdentifierOwned) -> Result<Self> {
        match algorithm.oid {
            oid if oid == SHA256_WITH_RSA => Ok(Self::Sha256),
            oid if oid == SHA384_WITH_RSA => Ok(Self::Sha384),
            oid if oid == SHA512_WITH_RSA => Ok(Self::Sha512),
            other => Err(ProxyError::Chain(format!(
                "Unsupported signature algorithm {}",
                other
            ))),
        }
    }

    /// Algorithm identifier with the NULL parameters RFC 4055 requires
    pub fn algorithm(&self) -> Result<AlgorithmIdentifierOwned> {
        let oid = match self {
            Self::Sha256 => SHA256_WITH_RSA,
            Self::Sha384 => SHA384_WITH_RSA,
            Self::Sha512 => SHA512_WITH_RSA,
        };

        Ok(AlgorithmIdentifierOwned {
            oid,
            parameters: Some(der::Any::new(der::Tag::Null, Vec::<u8>::new())?),
        })
    }
}

/// RSA private key, exclusively owned
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl ZeroizeOnDrop for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

impl PrivateKey {
    /// Generate a fresh RSA key
    ///
    /// Blocks on the system entropy source; see
    /// [`crate::delegation::DelegationEngine::init_bounded`] for a bounded variant.
    pub fn generate(bits: usize) -> Result<Self> {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
            return Err(ProxyError::KeyGen(format!(
                "Key size {} outside supported range {}..={}",
                bits, MIN_KEY_BITS, MAX_KEY_BITS
            )));
        }

        let inner = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| ProxyError::KeyGen(format!("RSA key generation failed: {}", e)))?;

        Ok(Self { inner })
    }

    /// Wrap an existing RSA key
    pub fn from_rsa(inner: RsaPrivateKey) -> Self {
        Self { inner }
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.inner.size() * 8
    }

    /// Public half of the key
    pub fn public_key(&self) -> RsaPublicKey {
        self.inner.to_public_key()
    }

    /// SubjectPublicKeyInfo for embedding in requests and certificates
    pub fn subject_public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        spki_from_public_key(&self.public_key())
    }

    /// Sign data with RSA PKCS#1 v1.5 over the given digest
    pub fn sign_with(&self, digest: SignatureDigest, data: &[u8]) -> Result<Vec<u8>> {
        let signature = match digest {
            SignatureDigest::Sha256 => SigningKey::<Sha256>::new(self.inner.clone())
                .try_sign(data)
                .map(|s| s.to_vec()),
            SignatureDigest::Sha384 => SigningKey::<Sha384>::new(self.inner.clone())
                .try_sign(data)
                .map(|s| s.to_vec()),
            SignatureDigest::Sha512 => SigningKey::<Sha512>::new(self.inner.clone())
                .try_sign(data)
                .map(|s| s.to_vec()),
        };

        signature.map_err(|e| ProxyError::Signing(format!("RSA signing failed: {}", e)))
    }

    /// Sign data with RSA PKCS#1 v1.5 over SHA-256
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.sign_with(SignatureDigest::Sha256, data)
    }

    pub(crate) fn as_rsa(&self) -> &RsaPrivateKey {
        &self.inner
    }
}

/// Verify an RSA PKCS#1 v1.5 signature
pub fn verify_signature(
    public_key: &RsaPublicKey,
    digest: SignatureDigest,
    data: &[u8],
    signature: &[u8],
) -> Result<()> {
    let signature = Signature::try_from(signature)
        .map_err(|e| ProxyError::Chain(format!("Malformed signature: {}", e)))?;

    let outcome = match digest {
        SignatureDigest::Sha256 => {
            VerifyingKey::<Sha256>::new(public_key.clone()).verify(data, &signature)
        }
        SignatureDigest::Sha384 => {
            VerifyingKey::<Sha384>::new(public_key.clone()).verify(data, &signature)
        }
        SignatureDigest::Sha512 => {
            VerifyingKey::<Sha512>::new(public_key.clone()).verify(data, &signature)
        }
    };

    outcome.map_err(|e| ProxyError::Chain(format!("Signature verification failed: {}", e)))
}

/// Encode an RSA public key as SubjectPublicKeyInfo
pub fn spki_from_public_key(public_key: &RsaPublicKey) -> Result<SubjectPublicKeyInfoOwned> {
    let document = public_key
        .to_public_key_der()
        .map_err(|e| ProxyError::Parse(format!("Failed to encode public key: {}", e)))?;

    Ok(SubjectPublicKeyInfoOwned::from_der(document.as_bytes())?)
}

/// Decode an RSA public key from SubjectPublicKeyInfo
pub fn public_key_from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<RsaPublicKey> {
    let der = spki.to_der()?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| ProxyError::Parse(format!("Unsupported or malformed public key: {}", e)))
}

/// Modulus size of a public key in bits
pub fn public_key_bits(public_key: &RsaPublicKey) -> usize {
    public_key.size() * 8
}
