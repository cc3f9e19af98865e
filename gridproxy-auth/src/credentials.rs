//! Credential container
//!
//! A credential is one end-entity certificate, at most one private key and the
//! chain of certificates that issued it (newest proxy first, ending just
//! before the trust anchor). When a private key is present its public half
//! always matches the end-entity certificate.

use crate::certificate::{self, ProxyDescriptor};
use crate::codec;
use crate::error::{ProxyError, Result};
use crate::fs;
use crate::key::{self, PrivateKey, SignatureDigest};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};
use x509_cert::name::Name;
use x509_cert::Certificate;

/// Certificate, optional private key and issuing chain
#[derive(Debug)]
pub struct CredentialContainer {
    certificate: Certificate,
    key: Option<PrivateKey>,
    chain: Vec<Certificate>,
}

impl CredentialContainer {
    /// Assemble a credential, checking that the key matches the certificate
    pub fn from_parts(
        certificate: Certificate,
        key: Option<PrivateKey>,
        chain: Vec<Certificate>,
    ) -> Result<Self> {
        if let Some(key) = &key {
            check_key_matches(&certificate, key)?;
        }

        Ok(Self {
            certificate,
            key,
            chain,
        })
    }

    /// Read a credential file
    pub fn from_file(path: impl AsRef<Path>, passphrase: Option<&[u8]>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = zeroize::Zeroizing::new(fs::read(path)?);
        let container = codec::decode_credentials(&bytes, passphrase)?;

        debug!(
            path = %path.display(),
            subject = %container.subject(),
            has_key = container.key.is_some(),
            chain_len = container.chain.len(),
            "Credential loaded"
        );
        Ok(container)
    }

    /// Decode a credential from PEM bytes
    pub fn from_buffer(buffer: &[u8], passphrase: Option<&[u8]>) -> Result<Self> {
        codec::decode_credentials(buffer, passphrase)
    }

    /// Read a certificate file (end-entity plus chain, no key)
    pub fn from_certificate_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut certificates = codec::certificates_from_pem(&fs::read(path)?)?.into_iter();
        let certificate = certificates.next().ok_or_else(|| {
            ProxyError::Parse(format!("{} contains no certificate", path.display()))
        })?;

        Ok(Self {
            certificate,
            key: None,
            chain: certificates.collect(),
        })
    }

    /// Replace the contents of this credential with a credential file
    ///
    /// On error the credential is left unchanged.
    pub fn load_from_file(&mut self, path: impl AsRef<Path>, passphrase: Option<&[u8]>) -> Result<()> {
        *self = Self::from_file(path, passphrase)?;
        Ok(())
    }

    /// Replace the contents of this credential with PEM bytes
    pub fn load_from_buffer(&mut self, buffer: &[u8], passphrase: Option<&[u8]>) -> Result<()> {
        *self = Self::from_buffer(buffer, passphrase)?;
        Ok(())
    }

    /// Replace the certificate and chain from a certificate file
    ///
    /// A held private key is kept only if it matches the new certificate;
    /// otherwise this fails with a key mismatch and nothing changes.
    pub fn certificate_load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let loaded = Self::from_certificate_file(path)?;
        if let Some(key) = &self.key {
            check_key_matches(&loaded.certificate, key)?;
        }

        self.certificate = loaded.certificate;
        self.chain = loaded.chain;
        Ok(())
    }

    /// Load the private key from a PEM file
    pub fn private_key_load_from_file(
        &mut self,
        path: impl AsRef<Path>,
        passphrase: Option<&[u8]>,
    ) -> Result<()> {
        let bytes = zeroize::Zeroizing::new(fs::read(path.as_ref())?);
        let key = codec::decode_private_key(&bytes, passphrase)?;
        check_key_matches(&self.certificate, &key)?;

        self.key = Some(key);
        Ok(())
    }

    /// Write the private key alone to a new file
    pub fn private_key_store_to_file(
        &self,
        path: impl AsRef<Path>,
        passphrase: Option<&[u8]>,
    ) -> Result<()> {
        let key = self.key.as_ref().ok_or_else(|| {
            ProxyError::InvalidArgument("Credential holds no private key".to_string())
        })?;

        let pem = codec::encode_private_key(key, passphrase)?;
        fs::write_exclusive(path.as_ref(), pem.as_bytes())
    }

    /// Write the credential to a new file
    ///
    /// Fails with [`ProxyError::IoConflict`] if `path` already exists.
    pub fn store_to_file(&self, path: impl AsRef<Path>, passphrase: Option<&[u8]>) -> Result<()> {
        let path = path.as_ref();
        let pem = self.to_pem(passphrase)?;
        fs::write_exclusive(path, pem.as_bytes())?;

        info!(
            path = %path.display(),
            subject = %self.subject(),
            encrypted = passphrase.is_some(),
            "Credential stored"
        );
        Ok(())
    }

    /// Encode as PEM
    pub fn to_pem(&self, passphrase: Option<&[u8]>) -> Result<zeroize::Zeroizing<String>> {
        codec::encode_credentials(self, passphrase)
    }

    /// Install a new end-entity certificate, moving the current one to the
    /// front of the chain
    ///
    /// A held private key must match the new certificate.
    pub fn push_certificate(&mut self, certificate: Certificate) -> Result<()> {
        if let Some(key) = &self.key {
            check_key_matches(&certificate, key)?;
        }

        let previous = std::mem::replace(&mut self.certificate, certificate);
        self.chain.insert(0, previous);
        Ok(())
    }

    /// Whether the end-entity certificate is a proxy
    ///
    /// Errors when a proxy extension is present but malformed.
    pub fn is_proxy(&self) -> Result<bool> {
        Ok(self.proxy_descriptor()?.is_some())
    }

    /// Proxy markers of the end-entity certificate
    pub fn proxy_descriptor(&self) -> Result<Option<ProxyDescriptor>> {
        certificate::proxy_descriptor(&self.certificate)
    }

    /// Subject of the first non-proxy certificate
    pub fn base_subject(&self) -> Result<Name> {
        certificate::base_subject(self.certificates())
    }

    /// Sign data with the private key (RSA PKCS#1 v1.5, SHA-256)
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.key
            .as_ref()
            .ok_or_else(|| ProxyError::Signing("Credential holds no private key".to_string()))?
            .sign(data)
    }

    /// Verify a signature made by [`Self::sign`]
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        key::verify_signature(
            &certificate::public_key(&self.certificate)?,
            SignatureDigest::Sha256,
            data,
            signature,
        )
    }

    /// Wipe the private key and release the credential
    pub fn destroy(mut self) {
        if self.key.take().is_some() {
            debug!(subject = %self.subject(), "Private key wiped");
        }
    }

    /// End-entity certificate
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Issuing chain, newest first
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// End-entity certificate followed by the chain
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        std::iter::once(&self.certificate).chain(self.chain.iter())
    }

    /// Private key, if held
    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.key.as_ref()
    }

    /// Subject of the end-entity certificate
    pub fn subject(&self) -> &Name {
        &self.certificate.tbs_certificate.subject
    }

    /// Modulus size of the end-entity public key
    pub fn key_bits(&self) -> Result<usize> {
        Ok(key::public_key_bits(&certificate::public_key(
            &self.certificate,
        )?))
    }

    /// Start of the end-entity validity
    pub fn not_before(&self) -> Result<DateTime<Utc>> {
        certificate::not_before(&self.certificate)
    }

    /// End of the end-entity validity
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        certificate::not_after(&self.certificate)
    }
}

/// Whether the private key in a PEM file is passphrase protected
pub fn private_key_is_encrypted(path: impl AsRef<Path>) -> Result<bool> {
    let bytes = zeroize::Zeroizing::new(fs::read(path.as_ref())?);
    codec::is_encrypted_key(&bytes)
}

fn check_key_matches(certificate: &Certificate, key: &PrivateKey) -> Result<()> {
    if certificate::public_key(certificate)? != key.public_key() {
        return Err(ProxyError::KeyMismatch(format!(
            "Private key does not match certificate '{}'",
            certificate.tbs_certificate.subject
        )));
    }
    Ok(())
}
