//! # gridproxy-auth: proxy certificate delegation
//!
//! A holder of an X.509 credential hands a short-lived, possibly restricted
//! proxy credential to a remote party without ever sending its private key.
//!
//! ## Features
//!
//! - **Credential containers**: certificate, optional private key and issuing chain
//! - **Delegation**: key generation, request signing and finalization in three phases
//! - **Restrictions**: lifetime (clamped to the issuer), limited proxies, path length
//! - **Codec**: PEM files with optionally encrypted keys, DER transfer buffers
//! - **Validation**: time, chain, proxy rules and revocation against a trust store
//!
//! ## Protocol
//!
//! ```text
//!   client (holds B)                      issuer (holds B's key)
//!   ----------------                      ----------------------
//!   init(B) -> request, key
//!           ---- DER certificate request ---->
//!                                         sign(B, restrictions, request)
//!           <--- proxy + B + B's chain -------
//!   finalize(request, reply) -> P
//! ```
//!
//! The issuer's reply is concatenated DER; credential files are PEM.

#![warn(missing_docs)]

pub mod certificate;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod delegation;
pub mod error;
pub mod fs;
pub mod identity;
pub mod key;
pub mod restrictions;
pub mod trust;
pub mod verification;

// Re-exports for convenience
pub use certificate::{ProxyDescriptor, ProxyFormat, ProxyRights};
pub use config::{Config, DelegationConfig, ValidationPolicy};
pub use credentials::{private_key_is_encrypted, CredentialContainer};
pub use delegation::{DelegationEngine, DelegationRequest, KeyGenStatus, RequestTemplate};
pub use error::{ErrorKind, ProxyError, Result};
pub use fs::proxy_file_destroy;
pub use identity::{FileIdentityProvider, IdentityProvider};
pub use key::PrivateKey;
pub use restrictions::RestrictionSet;
pub use trust::{MemoryTrustStore, RevocationStatus, TrustStore};
pub use verification::{
    base_subject_file, get_times, limited_proxy_chain, limited_proxy_file, CredentialVerifier,
    VerificationReport,
};

/// Re-exported so callers can name certificates without depending on x509-cert
pub use x509_cert::{name::Name, Certificate};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
