//! Proxy delegation
//!
//! Three phases over an externally supplied channel:
//!
//! 1. [`DelegationEngine::init`] (client): generate a key pair and a signed
//!    certificate request for `<source subject>/CN=<serial>`.
//! 2. [`DelegationEngine::sign`] (issuer): issue the proxy certificate and
//!    return it together with the issuer's own chain as concatenated DER.
//! 3. [`DelegationEngine::finalize`] (client): check the returned certificate
//!    carries the generated key and assemble the new credential.
//!
//! A [`DelegationRequest`] is consumed by [`DelegationEngine::finalize`] or
//! [`DelegationRequest::destroy`]; dropping it on any other path wipes the
//! generated key as well.

use crate::certificate::{self, CertSummary};
use crate::codec;
use crate::config::DelegationConfig;
use crate::credentials::CredentialContainer;
use crate::error::{ProxyError, Result};
use crate::key::{self, PrivateKey, SignatureDigest, MAX_KEY_BITS, MIN_KEY_BITS};
use crate::restrictions::RestrictionSet;
use chrono::{DateTime, Utc};
use der::asn1::{BitString, SetOfVec};
use der::{Decode, Encode};
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use x509_cert::name::Name;
use x509_cert::request::{CertReq, CertReqInfo, Version};

/// Subject and key size for a request, fixed before key generation starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTemplate {
    subject: Name,
    serial: u64,
    bits: usize,
}

impl RequestTemplate {
    /// Derive a template from the credential being delegated
    ///
    /// `requested_bits == 0` inherits the source key size, falling back to
    /// `default_bits` when the source key is outside the supported range.
    pub fn from_source(
        source: &CredentialContainer,
        requested_bits: usize,
        default_bits: usize,
    ) -> Result<Self> {
        let bits = match requested_bits {
            0 => source
                .key_bits()
                .ok()
                .filter(|bits| (MIN_KEY_BITS..=MAX_KEY_BITS).contains(bits))
                .unwrap_or(default_bits),
            bits => bits,
        };

        let serial = rand::thread_rng().gen_range(1..=i64::MAX as u64);
        let subject = certificate::proxy_subject(source.subject(), serial)?;

        Ok(Self {
            subject,
            serial,
            bits,
        })
    }

    /// Subject the proxy will carry
    pub fn subject(&self) -> &Name {
        &self.subject
    }

    /// Proxy serial number
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Key size to generate
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Generate the key and the signed request
    pub fn generate(self) -> Result<DelegationRequest> {
        let key = PrivateKey::generate(self.bits)?;

        let info = CertReqInfo {
            version: Version::V1,
            subject: self.subject.clone(),
            public_key: key.subject_public_key_info()?,
            attributes: SetOfVec::new(),
        };
        let signature = key.sign(&info.to_der()?)?;
        let request = CertReq {
            info,
            algorithm: SignatureDigest::Sha256.algorithm()?,
            signature: BitString::from_bytes(&signature)?,
        };

        Ok(DelegationRequest {
            key,
            request_der: request.to_der()?,
            subject: self.subject,
            serial: self.serial,
        })
    }
}

/// Client-side state between request generation and finalization
#[derive(Debug)]
pub struct DelegationRequest {
    key: PrivateKey,
    request_der: Vec<u8>,
    subject: Name,
    serial: u64,
}

impl DelegationRequest {
    /// DER certificate request to send to the issuer
    pub fn request_bytes(&self) -> &[u8] {
        &self.request_der
    }

    /// Subject requested for the proxy
    pub fn subject(&self) -> &Name {
        &self.subject
    }

    /// Proxy serial number
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Size of the generated key
    pub fn key_bits(&self) -> usize {
        self.key.bits()
    }

    /// Abandon the request, wiping the generated key
    pub fn destroy(self) {
        debug!(subject = %self.subject, "Delegation request abandoned");
    }
}

/// Progress of key generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyGenStatus {
    /// Nothing started yet
    Idle,
    /// Generation running
    Generating {
        /// Requested key size
        bits: usize,
    },
    /// Key and request ready
    Done {
        /// Wall time spent
        elapsed: Duration,
    },
    /// Generation failed or timed out
    Failed {
        /// Failure description
        reason: String,
    },
}

/// Proxy delegation engine
#[derive(Debug, Clone, Default)]
pub struct DelegationEngine {
    config: DelegationConfig,
}

impl DelegationEngine {
    /// Create an engine, validating the configuration
    pub fn new(config: DelegationConfig) -> Result<Self> {
        config.check()?;
        Ok(Self { config })
    }

    /// Engine configuration
    pub fn config(&self) -> &DelegationConfig {
        &self.config
    }

    /// Template for delegating `source`
    pub fn template(
        &self,
        source: &CredentialContainer,
        requested_bits: usize,
    ) -> Result<RequestTemplate> {
        RequestTemplate::from_source(source, requested_bits, self.config.default_key_bits)
    }

    /// Phase 1: generate a key and a certificate request
    ///
    /// Returns the pending request and the DER bytes to send to the issuer.
    pub fn init(
        &self,
        source: &CredentialContainer,
        requested_bits: usize,
    ) -> Result<(DelegationRequest, Vec<u8>)> {
        let template = self.template(source, requested_bits)?;
        let start = Instant::now();
        let request = template.generate()?;

        info!(
            subject = %request.subject,
            bits = request.key_bits(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Delegation request generated"
        );

        let bytes = request.request_der.clone();
        Ok((request, bytes))
    }

    /// Phase 1 on a blocking task, bounded by the configured `keygen_timeout`
    ///
    /// On timeout the background generation is left to finish and its key is
    /// dropped (and wiped) unseen.
    pub async fn init_bounded(
        &self,
        template: RequestTemplate,
    ) -> Result<(DelegationRequest, Vec<u8>)> {
        let (tx, _rx) = watch::channel(KeyGenStatus::Idle);
        self.init_with_progress(template, self.config.keygen_timeout, &tx)
            .await
    }

    /// Bounded phase 1 publishing [`KeyGenStatus`] updates
    ///
    /// `limit` overrides the configured `keygen_timeout` for this call.
    pub async fn init_with_progress(
        &self,
        template: RequestTemplate,
        limit: Duration,
        progress: &watch::Sender<KeyGenStatus>,
    ) -> Result<(DelegationRequest, Vec<u8>)> {
        let bits = template.bits();
        let start = Instant::now();
        progress.send_replace(KeyGenStatus::Generating { bits });

        let task = tokio::task::spawn_blocking(move || template.generate());

        let outcome = match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ProxyError::KeyGen(format!(
                "Key generation task failed: {}",
                join_err
            ))),
            Err(_elapsed) => Err(ProxyError::KeyGen(format!(
                "Key generation timed out after {:?}",
                limit
            ))),
        };

        match outcome {
            Ok(request) => {
                let elapsed = start.elapsed();
                progress.send_replace(KeyGenStatus::Done { elapsed });
                info!(
                    subject = %request.subject,
                    bits,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Delegation request generated"
                );

                let bytes = request.request_der.clone();
                Ok((request, bytes))
            }
            Err(err) => {
                progress.send_replace(KeyGenStatus::Failed {
                    reason: err.to_string(),
                });
                warn!(bits, error = %err, "Key generation failed");
                Err(err)
            }
        }
    }

    /// Phase 2: issue a proxy certificate for `request`
    ///
    /// The proxy's notAfter is the earlier of `now + lifetime` and the
    /// issuer's notAfter; a longer lifetime is clamped, not rejected. A proxy
    /// signed by a limited proxy is itself limited.
    ///
    /// The request's subject is taken as the proxy subject, so it must be the
    /// issuer's subject plus one `CN` holding a positive 63-bit serial, as
    /// [`DelegationEngine::init`] produces. Any other subject, including a
    /// legacy `CN=proxy`, is a [`ProxyError::MalformedRequest`].
    pub fn sign(
        &self,
        issuer: &CredentialContainer,
        restrictions: &RestrictionSet,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let request = CertReq::from_der(request)
            .map_err(|e| ProxyError::MalformedRequest(format!("Undecodable request: {}", e)))?;
        let (requested_key, serial) = check_request(&request, issuer.subject())?;

        let issuer_key = issuer.private_key().ok_or_else(|| {
            ProxyError::Signing(format!("Issuer '{}' holds no private key", issuer.subject()))
        })?;

        let now = whole_seconds(Utc::now());
        let issuer_not_before = issuer.not_before()?;
        let issuer_not_after = issuer.not_after()?;
        if issuer_not_after <= now {
            return Err(ProxyError::Signing(format!(
                "Issuer '{}' expired at {}",
                issuer.subject(),
                issuer_not_after
            )));
        }

        let lifetime = restrictions
            .lifetime()
            .unwrap_or(self.config.default_lifetime);
        let lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|_| ProxyError::InvalidArgument(format!("Lifetime {:?} too large", lifetime)))?;
        let requested_end = now.checked_add_signed(lifetime).unwrap_or(issuer_not_after);
        let clamped = requested_end > issuer_not_after;
        let not_after = requested_end.min(issuer_not_after);

        let skew = chrono::Duration::from_std(self.config.clock_skew)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let not_before = (now - skew).max(issuer_not_before);

        let issuer_proxy = issuer.proxy_descriptor()?;
        let inherited_limited = issuer_proxy.as_ref().map_or(false, |p| p.is_limited());
        let limited = restrictions.limited() || inherited_limited;

        let path_len = match issuer_proxy.as_ref().and_then(|p| p.path_len) {
            Some(0) => {
                return Err(ProxyError::Signing(format!(
                    "Issuer '{}' may not delegate further (path length exhausted)",
                    issuer.subject()
                )))
            }
            Some(remaining) => Some(
                restrictions
                    .path_length()
                    .map_or(remaining - 1, |requested| requested.min(remaining - 1)),
            ),
            None => restrictions.path_length(),
        };

        let tbs = certificate::tbs_template(
            certificate::serial_number(serial)?,
            issuer.subject().clone(),
            request.info.subject.clone(),
            &requested_key,
            not_before,
            not_after,
            vec![certificate::proxy_cert_info_extension(limited, path_len)?],
        )?;
        let proxy = certificate::sign_tbs(tbs, issuer_key)?;

        info!(
            proxy = %CertSummary(&proxy),
            %not_after,
            limited,
            inherited_limited,
            clamped,
            path_len = ?path_len,
            "Proxy certificate signed"
        );

        let mut issued = Vec::with_capacity(issuer.chain().len() + 2);
        issued.push(proxy);
        issued.extend(issuer.certificates().cloned());
        codec::creds_to_buffer(&issued)
    }

    /// Phase 3: build the delegated credential from the issuer's reply
    pub fn finalize(
        &self,
        request: DelegationRequest,
        signed: &[u8],
    ) -> Result<CredentialContainer> {
        let mut certificates = codec::creds_from_buffer(signed)?.into_iter();
        let proxy = certificates
            .next()
            .ok_or_else(|| ProxyError::Parse("Signed proxy buffer is empty".to_string()))?;

        if certificate::public_key(&proxy)? != request.key.public_key() {
            warn!(
                requested = %request.subject,
                returned = %CertSummary(&proxy),
                "Returned proxy does not carry the generated key"
            );
            return Err(ProxyError::KeyMismatch(format!(
                "Certificate '{}' does not certify the key generated for '{}'",
                proxy.tbs_certificate.subject, request.subject
            )));
        }

        if proxy.tbs_certificate.subject != request.subject {
            warn!(
                requested = %request.subject,
                returned = %proxy.tbs_certificate.subject,
                "Issuer changed the proxy subject"
            );
        }

        let DelegationRequest { key, subject, .. } = request;
        let container = CredentialContainer::from_parts(proxy, Some(key), certificates.collect())?;

        info!(subject = %subject, chain_len = container.chain().len(), "Delegated credential ready");
        Ok(container)
    }
}

/// Check proof of possession and subject shape; return the key and serial
fn check_request(request: &CertReq, issuer_subject: &Name) -> Result<(rsa::RsaPublicKey, u64)> {
    let public_key = key::public_key_from_spki(&request.info.public_key)
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    let digest = SignatureDigest::from_algorithm(&request.algorithm)
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;
    let signature = request.signature.as_bytes().ok_or_else(|| {
        ProxyError::MalformedRequest("Request signature has unused bits".to_string())
    })?;
    key::verify_signature(&public_key, digest, &request.info.to_der()?, signature)
        .map_err(|_| ProxyError::MalformedRequest("Request signature does not verify".to_string()))?;

    let subject = &request.info.subject;
    if !certificate::extends_by_one_component(subject, issuer_subject) {
        return Err(ProxyError::MalformedRequest(format!(
            "Requested subject '{}' is not a proxy name of '{}'",
            subject, issuer_subject
        )));
    }

    let serial = certificate::last_common_name(subject)
        .and_then(|cn| cn.parse::<u64>().ok())
        .filter(|serial| (1..=i64::MAX as u64).contains(serial))
        .ok_or_else(|| {
            ProxyError::MalformedRequest(format!(
                "Requested subject '{}' does not end in a serial number",
                subject
            ))
        })?;

    Ok((public_key, serial))
}

fn whole_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}
