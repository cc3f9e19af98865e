//! Multi-hop delegation from a self-signed root and from a CA-issued user

use anyhow::Result;
use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use gridproxy_auth::{
    limited_proxy_chain, limited_proxy_file, CredentialVerifier, MemoryTrustStore, ProxyError,
    RestrictionSet, TrustStore, ValidationPolicy,
};
use gridproxy_tests::common::{
    delegate, issue_user, setup_test_logging, site_ca, test_engine, trust_root_of, user_root,
};
use tracing::info;

#[test]
fn test_root_to_limited_second_hop() -> Result<()> {
    setup_test_logging();
    let engine = test_engine();
    let root = user_root("Alice")?;

    let p1 = delegate(&engine, &root, &RestrictionSet::new().with_lifetime(3600)?)?;
    info!(subject = %p1.subject(), "First hop delegated");

    let before = Utc::now();
    let p2 = delegate(
        &engine,
        &p1,
        &RestrictionSet::new().with_lifetime(7200)?.with_limited(true),
    )?;

    // 7200s exceeds what is left of P1, so P2 ends with it
    assert!(before + Duration::seconds(7200) > p1.not_after()?);
    assert_eq!(p2.not_after()?, p1.not_after()?);

    assert_eq!(p2.chain().len(), 2);
    assert_eq!(&p2.chain()[0], p1.certificate());
    assert!(limited_proxy_chain(&[p2.certificate().clone(), p1.certificate().clone()])?);
    assert!(!limited_proxy_chain(&[p1.certificate().clone()])?);

    let report = CredentialVerifier::new(trust_root_of(&root)).verify_cred(&p2)?;
    assert_eq!(report.proxy_depth, 2);
    assert!(report.limited);
    assert_eq!(report.identity, root.subject().to_string());
    assert_eq!(report.not_after, p1.not_after()?);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("x509up_p2");
    p2.store_to_file(&path, None)?;
    assert!(limited_proxy_file(&path)?);
    Ok(())
}

#[test]
fn test_ca_issued_user_chain_and_revocation() -> Result<()> {
    setup_test_logging();
    let engine = test_engine();
    let ca = site_ca()?;
    let user = issue_user(&ca, "Bob")?;
    let proxy = delegate(&engine, &user, &RestrictionSet::new().with_lifetime(1800)?)?;

    let trust = || MemoryTrustStore::new().with_anchor(ca.certificate().clone());

    let report = CredentialVerifier::new(trust()).verify_cred(&proxy)?;
    assert_eq!(report.identity, user.subject().to_string());
    assert_eq!(report.chain.len(), 3);
    assert!(report.revocation_checked);

    let mut revoking = trust();
    revoking.revoke(user.certificate());
    assert!(revoking.anchor(ca.subject()).is_some());
    assert_matches!(
        CredentialVerifier::new(revoking).verify_cred(&proxy),
        Err(ProxyError::Revoked { .. })
    );

    let mut offline = trust();
    offline.set_unreachable(Some("CRL distribution point unreachable".to_string()));
    assert_matches!(
        CredentialVerifier::new(offline).verify_cred(&proxy),
        Err(ProxyError::SoftFail(_))
    );

    let mut offline = trust();
    offline.set_unreachable(Some("CRL distribution point unreachable".to_string()));
    let lenient = CredentialVerifier::with_policy(
        offline,
        ValidationPolicy {
            allow_soft_fail: true,
            ..Default::default()
        },
    );
    assert!(!lenient.verify_cred(&proxy)?.revocation_checked);
    Ok(())
}

#[test]
fn test_user_certificate_cannot_issue_users() -> Result<()> {
    let ca = site_ca()?;
    let user = issue_user(&ca, "Bob")?;
    let impostor = issue_user(&user, "Carol")?;

    let verifier = CredentialVerifier::new(MemoryTrustStore::new().with_anchor(ca.certificate().clone()));
    assert_matches!(verifier.verify_cred(&impostor), Err(ProxyError::Chain(_)));
    Ok(())
}
