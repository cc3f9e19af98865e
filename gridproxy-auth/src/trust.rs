//! Trust anchors and revocation
//!
//! The validation engine asks a [`TrustStore`] two questions: which
//! certificate anchors a given issuer name, and whether a certificate has
//! been revoked. Fetching CRLs or talking to OCSP responders is left to the
//! implementation.

use crate::certificate;
use std::collections::{HashMap, HashSet};
use x509_cert::name::Name;
use x509_cert::Certificate;

/// Answer from a revocation source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Not revoked
    Good,
    /// Confirmed revoked
    Revoked {
        /// Reason reported by the source
        reason: String,
    },
    /// Source could not be consulted
    Unreachable {
        /// What went wrong
        detail: String,
    },
}

/// CA trust and revocation queries
pub trait TrustStore: Send + Sync {
    /// Trusted certificate whose subject is `subject`
    fn anchor(&self, subject: &Name) -> Option<Certificate>;

    /// Revocation status of a CA-issued certificate
    fn revocation_status(&self, certificate: &Certificate) -> RevocationStatus;
}

/// In-memory trust store
#[derive(Debug, Default)]
pub struct MemoryTrustStore {
    anchors: Vec<Certificate>,
    revoked: HashMap<String, HashSet<String>>,
    unreachable: Option<String>,
}

impl MemoryTrustStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a CA certificate
    pub fn add_anchor(&mut self, anchor: Certificate) {
        self.anchors.push(anchor);
    }

    /// Builder form of [`Self::add_anchor`]
    pub fn with_anchor(mut self, anchor: Certificate) -> Self {
        self.add_anchor(anchor);
        self
    }

    /// Mark a certificate as revoked by its issuer
    pub fn revoke(&mut self, certificate: &Certificate) {
        self.revoked
            .entry(certificate.tbs_certificate.issuer.to_string())
            .or_default()
            .insert(certificate::serial_hex(certificate));
    }

    /// Simulate an unreachable revocation source
    pub fn set_unreachable(&mut self, detail: Option<String>) {
        self.unreachable = detail;
    }
}

impl TrustStore for MemoryTrustStore {
    fn anchor(&self, subject: &Name) -> Option<Certificate> {
        self.anchors
            .iter()
            .find(|anchor| &anchor.tbs_certificate.subject == subject)
            .cloned()
    }

    fn revocation_status(&self, certificate: &Certificate) -> RevocationStatus {
        if let Some(detail) = &self.unreachable {
            return RevocationStatus::Unreachable {
                detail: detail.clone(),
            };
        }

        let revoked = self
            .revoked
            .get(&certificate.tbs_certificate.issuer.to_string())
            .map_or(false, |serials| {
                serials.contains(&certificate::serial_hex(certificate))
            });

        if revoked {
            RevocationStatus::Revoked {
                reason: "listed in revocation list".to_string(),
            }
        } else {
            RevocationStatus::Good
        }
    }
}
