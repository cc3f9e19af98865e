//! Credential verification
//!
//! Checks run in order and stop at the first failure:
//! 1. decode
//! 2. validity window of every certificate
//! 3. signatures, name chaining and proxy rules up to a trust anchor
//! 4. revocation of the CA-issued certificates
//!
//! An unreachable revocation source is reported as [`ProxyError::SoftFail`]
//! unless [`ValidationPolicy::allow_soft_fail`] is set.

use crate::certificate::{self, ProxyDescriptor};
use crate::codec;
use crate::config::ValidationPolicy;
use crate::credentials::CredentialContainer;
use crate::error::{ProxyError, Result};
use crate::fs;
use crate::trust::{RevocationStatus, TrustStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use x509_cert::name::Name;
use x509_cert::Certificate;

/// Outcome of a successful verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Subject of the end-entity certificate
    pub subject: String,

    /// Subject of the first non-proxy certificate
    pub identity: String,

    /// Subjects from end-entity to the last chain certificate
    pub chain: Vec<String>,

    /// Number of proxy certificates in the chain
    pub proxy_depth: usize,

    /// Whether any proxy in the chain is limited
    pub limited: bool,

    /// Earliest notAfter in the chain
    pub not_after: DateTime<Utc>,

    /// False when revocation could not be checked and soft fail was allowed
    pub revocation_checked: bool,

    /// Timestamp of verification
    pub verified_at: DateTime<Utc>,
}

/// Credential verifier
pub struct CredentialVerifier<T> {
    trust: T,
    policy: ValidationPolicy,
}

impl<T: TrustStore> CredentialVerifier<T> {
    /// Create a verifier with the default policy
    pub fn new(trust: T) -> Self {
        Self::with_policy(trust, ValidationPolicy::default())
    }

    /// Create a verifier with an explicit policy
    pub fn with_policy(trust: T, policy: ValidationPolicy) -> Self {
        Self { trust, policy }
    }

    /// Verification policy
    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Trust store
    pub fn trust_store(&self) -> &T {
        &self.trust
    }

    /// Verify a credential file
    pub fn verify_cred_file(
        &self,
        path: impl AsRef<Path>,
        passphrase: Option<&[u8]>,
    ) -> Result<VerificationReport> {
        let container = CredentialContainer::from_file(path, passphrase)?;
        self.verify_cred(&container)
    }

    /// Verify a PEM credential buffer
    pub fn verify_cred_buffer(
        &self,
        buffer: &[u8],
        passphrase: Option<&[u8]>,
    ) -> Result<VerificationReport> {
        let container = CredentialContainer::from_buffer(buffer, passphrase)?;
        self.verify_cred(&container)
    }

    /// Verify a loaded credential
    pub fn verify_cred(&self, container: &CredentialContainer) -> Result<VerificationReport> {
        let chain: Vec<Certificate> = container.certificates().cloned().collect();
        self.verify_chain(&chain)
    }

    /// Verify a certificate chain, end-entity first
    pub fn verify_chain(&self, chain: &[Certificate]) -> Result<VerificationReport> {
        self.verify_chain_at(chain, Utc::now())
    }

    /// Verify a certificate chain as of `now`
    pub fn verify_chain_at(
        &self,
        chain: &[Certificate],
        now: DateTime<Utc>,
    ) -> Result<VerificationReport> {
        let result = self.check(chain, now);
        match &result {
            Ok(report) => info!(
                subject = %report.subject,
                identity = %report.identity,
                proxy_depth = report.proxy_depth,
                limited = report.limited,
                revocation_checked = report.revocation_checked,
                "Credential verified"
            ),
            Err(err) => warn!(
                subject = %chain.first().map(certificate::subject_string).unwrap_or_default(),
                kind = ?err.kind(),
                error = %err,
                "Credential rejected"
            ),
        }
        result
    }

    fn check(&self, chain: &[Certificate], now: DateTime<Utc>) -> Result<VerificationReport> {
        let end_entity = chain
            .first()
            .ok_or_else(|| ProxyError::Chain("Empty certificate chain".to_string()))?;

        let mut not_after = DateTime::<Utc>::MAX_UTC;
        for cert in chain {
            not_after = not_after.min(self.check_time(cert, now)?);
        }

        let descriptors = chain
            .iter()
            .map(certificate::proxy_descriptor)
            .collect::<Result<Vec<_>>>()?;

        for (index, cert) in chain.iter().enumerate() {
            match chain.get(index + 1) {
                Some(issuer) => {
                    self.check_link(cert, &descriptors[index], issuer, &descriptors[index + 1])?
                }
                None => self.check_anchor(cert, &descriptors[index], now)?,
            }
        }

        check_path_lengths(chain, &descriptors)?;

        let revocation_checked = self.check_revocation(chain, &descriptors)?;

        let identity = chain
            .iter()
            .zip(&descriptors)
            .find(|(_, descriptor)| descriptor.is_none())
            .map(|(cert, _)| certificate::subject_string(cert))
            .ok_or_else(|| ProxyError::Chain("Chain contains only proxies".to_string()))?;

        Ok(VerificationReport {
            subject: certificate::subject_string(end_entity),
            identity,
            chain: chain.iter().map(certificate::subject_string).collect(),
            proxy_depth: descriptors.iter().filter(|d| d.is_some()).count(),
            limited: descriptors.iter().flatten().any(ProxyDescriptor::is_limited),
            not_after,
            revocation_checked,
            verified_at: now,
        })
    }

    fn check_time(&self, cert: &Certificate, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let skew = chrono::Duration::from_std(self.policy.clock_skew)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let not_before = certificate::not_before(cert)?;
        let not_after = certificate::not_after(cert)?;

        if now + skew < not_before {
            return Err(ProxyError::NotYetValid {
                subject: certificate::subject_string(cert),
                not_before,
            });
        }
        if now - skew > not_after {
            return Err(ProxyError::Expired {
                subject: certificate::subject_string(cert),
                not_after,
            });
        }
        Ok(not_after)
    }

    fn check_link(
        &self,
        cert: &Certificate,
        descriptor: &Option<ProxyDescriptor>,
        issuer: &Certificate,
        issuer_descriptor: &Option<ProxyDescriptor>,
    ) -> Result<()> {
        let subject = &cert.tbs_certificate.subject;
        if cert.tbs_certificate.issuer != issuer.tbs_certificate.subject {
            return Err(ProxyError::Chain(format!(
                "'{}' names issuer '{}' but is followed by '{}'",
                subject, cert.tbs_certificate.issuer, issuer.tbs_certificate.subject
            )));
        }

        certificate::verify_issued_by(cert, &certificate::public_key(issuer)?)?;

        match (descriptor, issuer_descriptor) {
            (Some(_), _) => {
                if !certificate::extends_by_one_component(subject, &issuer.tbs_certificate.subject)
                {
                    return Err(ProxyError::Chain(format!(
                        "Proxy subject '{}' does not extend its issuer '{}'",
                        subject, issuer.tbs_certificate.subject
                    )));
                }
            }
            (None, Some(_)) => {
                return Err(ProxyError::Chain(format!(
                    "Proxy '{}' cannot issue end-entity certificate '{}'",
                    issuer.tbs_certificate.subject, subject
                )))
            }
            (None, None) => {
                if !certificate::is_ca(issuer) {
                    return Err(ProxyError::Chain(format!(
                        "'{}' issued '{}' but is not a CA",
                        issuer.tbs_certificate.subject, subject
                    )));
                }
            }
        }

        if self.policy.require_limited_propagation {
            if let (Some(proxy), Some(issuer_proxy)) = (descriptor, issuer_descriptor) {
                if issuer_proxy.is_limited() && !proxy.is_limited() {
                    return Err(ProxyError::Chain(format!(
                        "Limited proxy '{}' issued unlimited proxy '{}'",
                        issuer.tbs_certificate.subject, subject
                    )));
                }
            }
        }

        Ok(())
    }

    fn check_anchor(
        &self,
        cert: &Certificate,
        descriptor: &Option<ProxyDescriptor>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tbs = &cert.tbs_certificate;
        if descriptor.is_some() {
            return Err(ProxyError::Chain(format!(
                "Chain ends at proxy '{}' without its issuer",
                tbs.subject
            )));
        }

        let anchor = self.trust.anchor(&tbs.issuer).ok_or_else(|| {
            ProxyError::Chain(format!("No trust anchor for issuer '{}'", tbs.issuer))
        })?;
        let anchor_key = certificate::public_key(&anchor)?;

        if tbs.subject == tbs.issuer {
            if certificate::public_key(cert)? != anchor_key {
                return Err(ProxyError::Chain(format!(
                    "Self-signed '{}' is not the trusted anchor of that name",
                    tbs.subject
                )));
            }
        } else {
            self.check_time(&anchor, now)?;
        }

        certificate::verify_issued_by(cert, &anchor_key)?;
        debug!(anchor = %anchor.tbs_certificate.subject, "Chain anchored");
        Ok(())
    }

    fn check_revocation(
        &self,
        chain: &[Certificate],
        descriptors: &[Option<ProxyDescriptor>],
    ) -> Result<bool> {
        let mut unreachable = None;

        for (cert, _) in chain.iter().zip(descriptors).filter(|(_, d)| d.is_none()) {
            match self.trust.revocation_status(cert) {
                RevocationStatus::Good => {}
                RevocationStatus::Revoked { reason } => {
                    return Err(ProxyError::Revoked {
                        subject: certificate::subject_string(cert),
                        serial: certificate::serial_hex(cert),
                        reason,
                    })
                }
                RevocationStatus::Unreachable { detail } => {
                    unreachable.get_or_insert(detail);
                }
            }
        }

        match unreachable {
            None => Ok(true),
            Some(detail) if self.policy.allow_soft_fail => {
                warn!(detail = %detail, "Revocation unchecked, soft fail allowed");
                Ok(false)
            }
            Some(detail) => Err(ProxyError::SoftFail(detail)),
        }
    }
}

/// Each proxy's path length bounds the number of proxies below it
fn check_path_lengths(chain: &[Certificate], descriptors: &[Option<ProxyDescriptor>]) -> Result<()> {
    let mut proxies_below = 0u32;
    for (cert, descriptor) in chain.iter().zip(descriptors) {
        let Some(descriptor) = descriptor else {
            continue;
        };
        if let Some(limit) = descriptor.path_len {
            if proxies_below > limit {
                return Err(ProxyError::Chain(format!(
                    "Proxy '{}' allows {} further proxies, found {}",
                    cert.tbs_certificate.subject, limit, proxies_below
                )));
            }
        }
        proxies_below += 1;
    }
    Ok(())
}

/// Whether any certificate in the chain is a limited proxy
pub fn limited_proxy_chain(chain: &[Certificate]) -> Result<bool> {
    for cert in chain {
        if certificate::proxy_descriptor(cert)?.map_or(false, |d| d.is_limited()) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// [`limited_proxy_chain`] for a credential file; the key is not decrypted
pub fn limited_proxy_file(path: impl AsRef<Path>) -> Result<bool> {
    let bytes = zeroize::Zeroizing::new(fs::read(path.as_ref())?);
    limited_proxy_chain(&codec::credential_certificates(&bytes)?)
}

/// Base identity of a credential file; the key is not decrypted
pub fn base_subject_file(path: impl AsRef<Path>) -> Result<Name> {
    let bytes = zeroize::Zeroizing::new(fs::read(path.as_ref())?);
    certificate::base_subject(&codec::credential_certificates(&bytes)?)
}

/// Validity window of the end-entity certificate in a credential file
pub fn get_times(path: impl AsRef<Path>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let bytes = zeroize::Zeroizing::new(fs::read(path.as_ref())?);
    let certificates = codec::credential_certificates(&bytes)?;
    let end_entity = &certificates[0];
    Ok((
        certificate::not_before(end_entity)?,
        certificate::not_after(end_entity)?,
    ))
}
