//! Delegation protocol against the validation engine

use anyhow::Result;
use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use gridproxy_auth::{
    limited_proxy_chain, CredentialVerifier, ErrorKind, KeyGenStatus, ProxyError, RestrictionSet,
    ValidationPolicy,
};
use gridproxy_tests::common::{
    delegate, hand_built_proxy, self_signed_credential, setup_test_logging, test_engine,
    trust_root_of, user_root,
};
use std::time::Duration as StdDuration;
use tokio::sync::watch;

#[test]
fn test_delegated_proxy_verifies() -> Result<()> {
    setup_test_logging();
    let engine = test_engine();
    let base = user_root("Alice")?;

    let before = Utc::now();
    let proxy = delegate(&engine, &base, &RestrictionSet::new().with_lifetime(3600)?)?;
    let after = Utc::now();

    assert_eq!(proxy.certificate().tbs_certificate.issuer, *base.subject());
    let not_after = proxy.not_after()?;
    assert!(not_after >= before + Duration::seconds(3600) - Duration::seconds(1));
    assert!(not_after <= after + Duration::seconds(3600));

    let verifier = CredentialVerifier::new(trust_root_of(&base));
    let report = verifier.verify_cred(&proxy)?;
    assert_eq!(report.proxy_depth, 1);
    assert_eq!(report.identity, base.subject().to_string());
    Ok(())
}

#[test]
fn test_default_lifetime_applies() -> Result<()> {
    let engine = test_engine();
    let base = user_root("Alice")?;

    let proxy = delegate(&engine, &base, &RestrictionSet::new())?;
    let lifetime = proxy.not_after()? - Utc::now();
    assert!(lifetime > Duration::hours(11));
    assert!(lifetime <= Duration::hours(12));
    Ok(())
}

#[test]
fn test_lifetime_clamped_to_issuer() -> Result<()> {
    let engine = test_engine();
    let base = user_root("Alice")?;
    let short = delegate(&engine, &base, &RestrictionSet::new().with_lifetime(600)?)?;

    let child = delegate(&engine, &short, &RestrictionSet::new().with_lifetime(86_400)?)?;
    assert_eq!(child.not_after()?, short.not_after()?);
    Ok(())
}

#[test]
fn test_key_substitution_yields_no_credential() -> Result<()> {
    let engine = test_engine();
    let base = user_root("Alice")?;

    let (request, _) = engine.init(&base, 0)?;
    let (_, substituted) = engine.init(&base, 0)?;
    let signed = engine.sign(&base, &RestrictionSet::new(), &substituted)?;

    let result = engine.finalize(request, &signed);
    assert_matches!(result, Err(ProxyError::KeyMismatch(_)));
    Ok(())
}

#[test]
fn test_limited_flag_is_visible() -> Result<()> {
    let engine = test_engine();
    let base = user_root("Alice")?;

    let limited = delegate(&engine, &base, &RestrictionSet::new().with_limited(true))?;
    assert!(limited_proxy_chain(&[limited.certificate().clone()])?);

    let full = delegate(&engine, &base, &RestrictionSet::new())?;
    assert!(!limited_proxy_chain(&[full.certificate().clone()])?);
    Ok(())
}

#[test]
fn test_unlimited_under_limited_is_policy() -> Result<()> {
    let base = user_root("Alice")?;
    let limited = hand_built_proxy(&base, true, None)?;
    let escalated = hand_built_proxy(&limited, false, None)?;

    let strict = CredentialVerifier::new(trust_root_of(&base));
    assert_matches!(strict.verify_cred(&escalated), Err(ProxyError::Chain(_)));

    let relaxed = CredentialVerifier::with_policy(
        trust_root_of(&base),
        ValidationPolicy {
            require_limited_propagation: false,
            ..Default::default()
        },
    );
    let report = relaxed.verify_cred(&escalated)?;
    assert!(report.limited);
    Ok(())
}

#[test]
fn test_path_length_exceeded() -> Result<()> {
    let base = user_root("Alice")?;
    let last = hand_built_proxy(&base, false, Some(0))?;
    let beyond = hand_built_proxy(&last, false, None)?;

    let verifier = CredentialVerifier::new(trust_root_of(&base));
    assert!(verifier.verify_cred(&last).is_ok());
    assert_matches!(verifier.verify_cred(&beyond), Err(ProxyError::Chain(_)));
    Ok(())
}

#[test]
fn test_expiry_boundary() -> Result<()> {
    let now = Utc::now();

    let expired = self_signed_credential(
        "CN=Expired,O=Grid",
        now - Duration::hours(1),
        now - Duration::seconds(1),
        false,
    )?;
    let err = CredentialVerifier::new(trust_root_of(&expired))
        .verify_cred(&expired)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);

    let valid = self_signed_credential(
        "CN=Valid,O=Grid",
        now - Duration::hours(1),
        now + Duration::hours(1),
        false,
    )?;
    assert!(CredentialVerifier::new(trust_root_of(&valid))
        .verify_cred(&valid)
        .is_ok());
    Ok(())
}

#[test]
fn test_foreign_chain_rejected() -> Result<()> {
    let engine = test_engine();
    let alice = user_root("Alice")?;
    let proxy = delegate(&engine, &alice, &RestrictionSet::new())?;

    let bob = user_root("Bob")?;
    let verifier = CredentialVerifier::new(trust_root_of(&bob));
    assert_matches!(verifier.verify_cred(&proxy), Err(ProxyError::Chain(_)));
    Ok(())
}

#[tokio::test]
async fn test_bounded_key_generation() -> Result<()> {
    setup_test_logging();
    let engine = test_engine();
    let base = user_root("Alice")?;
    let (tx, mut rx) = watch::channel(KeyGenStatus::Idle);

    let template = engine.template(&base, 0)?;
    let (request, bytes) = engine
        .init_with_progress(template, StdDuration::from_secs(30), &tx)
        .await?;
    rx.changed().await?;
    assert_matches!(*rx.borrow(), KeyGenStatus::Done { .. });

    let signed = engine.sign(&base, &RestrictionSet::new(), &bytes)?;
    let proxy = engine.finalize(request, &signed)?;
    assert!(proxy.is_proxy()?);
    Ok(())
}
