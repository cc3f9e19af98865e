//! Credential files and buffers

use anyhow::Result;
use assert_matches::assert_matches;
use gridproxy_auth::codec;
use gridproxy_auth::{
    base_subject_file, get_times, private_key_is_encrypted, proxy_file_destroy, CredentialContainer,
    CredentialVerifier, ErrorKind, FileIdentityProvider, IdentityProvider, ProxyError,
    RestrictionSet,
};
use gridproxy_tests::common::{delegate, setup_test_logging, test_engine, trust_root_of, user_root};

#[test]
fn test_file_round_trip_validates_identically() -> Result<()> {
    setup_test_logging();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("x509up_u1000");
    let base = user_root("Alice")?;
    let proxy = delegate(&test_engine(), &base, &RestrictionSet::new().with_limited(true))?;

    proxy.store_to_file(&path, Some(b"correct horse".as_slice()))?;
    assert!(private_key_is_encrypted(&path)?);

    let verifier = CredentialVerifier::new(trust_root_of(&base));
    let original = verifier.verify_cred(&proxy)?;
    let reloaded = verifier.verify_cred_file(&path, Some(b"correct horse".as_slice()))?;

    assert_eq!(reloaded.subject, original.subject);
    assert_eq!(reloaded.chain, original.chain);
    assert_eq!(reloaded.limited, original.limited);
    assert_eq!(reloaded.not_after, original.not_after);

    let loaded = CredentialContainer::from_file(&path, Some(b"correct horse".as_slice()))?;
    assert_eq!(loaded.sign(b"job")?, proxy.sign(b"job")?);
    Ok(())
}

#[test]
fn test_store_never_overwrites() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("proxy.pem");
    std::fs::write(&path, b"existing content")?;

    let base = user_root("Alice")?;
    let result = base.store_to_file(&path, None);
    assert_matches!(result, Err(ProxyError::IoConflict { .. }));
    assert_eq!(std::fs::read(&path)?, b"existing content");
    Ok(())
}

#[test]
fn test_decrypt_errors() -> Result<()> {
    let base = user_root("Alice")?;
    let pem = base.to_pem(Some(b"right".as_slice()))?;

    let err = CredentialContainer::from_buffer(pem.as_bytes(), Some(b"wrong".as_slice())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decrypt);

    let err = CredentialContainer::from_buffer(pem.as_bytes(), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decrypt);

    let err = CredentialContainer::from_buffer(b"-----BEGIN NONSENSE-----", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    Ok(())
}

#[test]
fn test_der_chain_buffer() -> Result<()> {
    let base = user_root("Alice")?;
    let proxy = delegate(&test_engine(), &base, &RestrictionSet::new())?;
    let chain: Vec<_> = proxy.certificates().cloned().collect();

    let buffer = codec::creds_to_buffer(&chain)?;
    assert_eq!(codec::creds_from_buffer(&buffer)?, chain);
    Ok(())
}

#[test]
fn test_certreq_pem_to_der() -> Result<()> {
    let base = user_root("Alice")?;
    let (request, der) = test_engine().init(&base, 0)?;

    let pem = pem::encode(&pem::Pem::new("CERTIFICATE REQUEST", der.clone()));
    assert_eq!(codec::certreq_pem_to_der(pem.as_bytes())?, der);

    let wrong = pem::encode(&pem::Pem::new("CERTIFICATE", der));
    assert!(codec::certreq_pem_to_der(wrong.as_bytes()).is_err());

    request.destroy();
    Ok(())
}

#[test]
fn test_identity_file_lifecycle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("x509up_u1000");
    let base = user_root("Alice")?;
    let proxy = delegate(&test_engine(), &base, &RestrictionSet::new().with_lifetime(600)?)?;
    proxy.store_to_file(&path, None)?;
    assert!(!private_key_is_encrypted(&path)?);

    let (not_before, not_after) = get_times(&path)?;
    assert_eq!(not_after, proxy.not_after()?);
    assert!(not_before < not_after);
    assert_eq!(base_subject_file(&path)?, *base.subject());

    let identity = FileIdentityProvider::open(&path, None)?;
    assert_eq!(identity.credential().base_subject()?, *base.subject());
    identity.teardown();

    proxy_file_destroy(&path)?;
    assert!(!path.exists());
    Ok(())
}
