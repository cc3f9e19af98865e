//! Common test utilities shared across integration and E2E tests

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use gridproxy_auth::certificate;
use gridproxy_auth::{
    CredentialContainer, DelegationConfig, DelegationEngine, MemoryTrustStore, Name, PrivateKey,
    RestrictionSet,
};
use rand::Rng;
use std::str::FromStr;

/// Key size used throughout the tests
pub const TEST_KEY_BITS: usize = 1024;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Delegation engine generating small keys
pub fn test_engine() -> DelegationEngine {
    DelegationEngine::new(DelegationConfig {
        default_key_bits: TEST_KEY_BITS,
        ..Default::default()
    })
    .expect("valid test config")
}

/// Self-signed credential with an explicit validity window
pub fn self_signed_credential(
    subject: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    ca: bool,
) -> Result<CredentialContainer> {
    let key = PrivateKey::generate(TEST_KEY_BITS)?;
    let cert = certificate::self_signed(Name::from_str(subject)?, &key, not_before, not_after, ca)?;
    Ok(CredentialContainer::from_parts(cert, Some(key), vec![])?)
}

/// Self-signed user credential valid for a year
pub fn user_root(cn: &str) -> Result<CredentialContainer> {
    let now = Utc::now();
    self_signed_credential(
        &format!("CN={},OU=People,O=Grid", cn),
        now - Duration::minutes(1),
        now + Duration::days(365),
        false,
    )
}

/// Self-signed CA valid for a year
pub fn site_ca() -> Result<CredentialContainer> {
    let now = Utc::now();
    self_signed_credential(
        "CN=Grid Test CA,O=Grid",
        now - Duration::hours(1),
        now + Duration::days(365),
        true,
    )
}

/// End-entity credential issued by `ca`
pub fn issue_user(ca: &CredentialContainer, cn: &str) -> Result<CredentialContainer> {
    let key = PrivateKey::generate(TEST_KEY_BITS)?;
    let now = Utc::now();
    let subject = Name::from_str(&format!("CN={},OU=People,O=Grid", cn))?;

    let tbs = certificate::tbs_template(
        certificate::serial_number(rand::thread_rng().gen_range(2..u32::MAX as u64))?,
        ca.subject().clone(),
        subject,
        &key.public_key(),
        now - Duration::minutes(1),
        now + Duration::days(30),
        vec![],
    )?;
    let issuer_key = ca.private_key().expect("CA holds a key");
    let cert = certificate::sign_tbs(tbs, issuer_key)?;

    Ok(CredentialContainer::from_parts(
        cert,
        Some(key),
        ca.certificates().cloned().collect(),
    )?)
}

/// Run the three delegation phases locally
pub fn delegate(
    engine: &DelegationEngine,
    issuer: &CredentialContainer,
    restrictions: &RestrictionSet,
) -> Result<CredentialContainer> {
    let (request, request_bytes) = engine.init(issuer, 0)?;
    let signed = engine.sign(issuer, restrictions, &request_bytes)?;
    Ok(engine.finalize(request, &signed)?)
}

/// Proxy signed directly, bypassing the engine's policy
pub fn hand_built_proxy(
    issuer: &CredentialContainer,
    limited: bool,
    path_len: Option<u32>,
) -> Result<CredentialContainer> {
    let key = PrivateKey::generate(TEST_KEY_BITS)?;
    let serial = rand::thread_rng().gen_range(1..i64::MAX as u64);
    let now = Utc::now();

    let tbs = certificate::tbs_template(
        certificate::serial_number(serial)?,
        issuer.subject().clone(),
        certificate::proxy_subject(issuer.subject(), serial)?,
        &key.public_key(),
        issuer.not_before()?,
        now + Duration::hours(1),
        vec![certificate::proxy_cert_info_extension(limited, path_len)?],
    )?;
    let issuer_key = issuer.private_key().expect("issuer holds a key");
    let cert = certificate::sign_tbs(tbs, issuer_key)?;

    Ok(CredentialContainer::from_parts(
        cert,
        Some(key),
        issuer.certificates().cloned().collect(),
    )?)
}

/// Trust store anchored at the last certificate of `credential`
pub fn trust_root_of(credential: &CredentialContainer) -> MemoryTrustStore {
    let root = credential
        .certificates()
        .last()
        .expect("credential has a certificate")
        .clone();
    MemoryTrustStore::new().with_anchor(root)
}
