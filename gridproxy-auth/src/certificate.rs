//! X.509 helpers for proxy certificates
//!
//! Proxy markers come in three flavours:
//! - RFC 3820 `proxyCertInfo` extension (1.3.6.1.5.5.7.1.14)
//! - the pre-RFC draft extension (1.3.6.1.4.1.3536.1.222)
//! - legacy proxies identified only by a trailing `CN=proxy` or
//!   `CN=limited proxy` in the subject
//!
//! A proxy subject is always its issuer's subject plus one `CN` component.

use crate::error::{ProxyError, Result};
use crate::key::{public_key_from_spki, verify_signature, PrivateKey, SignatureDigest};
use chrono::{DateTime, Datelike, Utc};
use der::asn1::{BitString, GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Decode, Encode, Sequence};
use rsa::RsaPublicKey;
use std::fmt;
use std::time::Duration;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::ext::Extension;
use x509_cert::name::{Name, RelativeDistinguishedName};
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// RFC 3820 proxyCertInfo extension
pub const PROXY_CERT_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.1.14");

/// Pre-RFC draft proxyCertInfo extension
pub const PROXY_CERT_INFO_DRAFT: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3536.1.222");

/// Policy language: inherit all rights of the issuer
pub const POLICY_INHERIT_ALL: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.21.1");

/// Policy language: no rights inherited
pub const POLICY_INDEPENDENT: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.21.2");

/// Policy language: limited proxy
pub const POLICY_LIMITED: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.3536.1.1.1.9");

/// commonName attribute
pub const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

/// basicConstraints extension
pub const BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");

const LEGACY_PROXY_CN: &str = "proxy";
const LEGACY_LIMITED_PROXY_CN: &str = "limited proxy";

/// `ProxyCertInfo ::= SEQUENCE { pCPathLenConstraint INTEGER OPTIONAL, proxyPolicy ProxyPolicy }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ProxyCertInfo {
    /// Maximum number of further proxies below this one
    #[asn1(optional = "true")]
    pub path_len_constraint: Option<u32>,

    /// Rights granted to the proxy
    pub proxy_policy: ProxyPolicy,
}

/// Pre-RFC layout carried under [`PROXY_CERT_INFO_DRAFT`]
///
/// `ProxyCertInfo ::= SEQUENCE { proxyPolicy ProxyPolicy,
/// pCPathLenConstraint [1] EXPLICIT INTEGER OPTIONAL }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ProxyCertInfoDraft {
    /// Rights granted to the proxy
    pub proxy_policy: ProxyPolicy,

    /// Maximum number of further proxies below this one
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub path_len_constraint: Option<u32>,
}

impl From<ProxyCertInfoDraft> for ProxyCertInfo {
    fn from(draft: ProxyCertInfoDraft) -> Self {
        Self {
            path_len_constraint: draft.path_len_constraint,
            proxy_policy: draft.proxy_policy,
        }
    }
}

/// `ProxyPolicy ::= SEQUENCE { policyLanguage OID, policy OCTET STRING OPTIONAL }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ProxyPolicy {
    /// Policy language identifier
    pub policy_language: ObjectIdentifier,

    /// Language-specific policy body
    #[asn1(optional = "true")]
    pub policy: Option<OctetString>,
}

/// How a certificate announces that it is a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFormat {
    /// Subject ends in `CN=proxy` / `CN=limited proxy`
    Legacy,
    /// Pre-RFC draft extension
    Draft,
    /// RFC 3820 extension
    Rfc3820,
}

/// Rights a proxy carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRights {
    /// Full rights of the issuer
    InheritAll,
    /// Reduced privilege
    Limited,
    /// No rights inherited
    Independent,
    /// Unrecognised policy language
    Other(ObjectIdentifier),
}

impl ProxyRights {
    fn from_language(language: ObjectIdentifier) -> Self {
        match language {
            oid if oid == POLICY_INHERIT_ALL => Self::InheritAll,
            oid if oid == POLICY_LIMITED => Self::Limited,
            oid if oid == POLICY_INDEPENDENT => Self::Independent,
            other => Self::Other(other),
        }
    }
}

/// Proxy markers found on a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyDescriptor {
    /// Marker flavour
    pub format: ProxyFormat,
    /// Rights carried
    pub rights: ProxyRights,
    /// Path length constraint, if any
    pub path_len: Option<u32>,
}

impl ProxyDescriptor {
    /// Whether this proxy is limited
    pub fn is_limited(&self) -> bool {
        self.rights == ProxyRights::Limited
    }
}

/// Inspect a certificate for proxy markers
///
/// Returns `Ok(None)` for an ordinary certificate and an error when a proxy
/// extension is present but cannot be decoded.
pub fn proxy_descriptor(cert: &Certificate) -> Result<Option<ProxyDescriptor>> {
    for ext in extensions(cert) {
        let format = if ext.extn_id == PROXY_CERT_INFO {
            ProxyFormat::Rfc3820
        } else if ext.extn_id == PROXY_CERT_INFO_DRAFT {
            ProxyFormat::Draft
        } else {
            continue;
        };

        let value = ext.extn_value.as_bytes();
        let decoded = match format {
            ProxyFormat::Draft => ProxyCertInfoDraft::from_der(value).map(ProxyCertInfo::from),
            _ => ProxyCertInfo::from_der(value),
        };
        let info = decoded.map_err(|e| {
            ProxyError::Parse(format!(
                "Malformed proxyCertInfo on '{}': {}",
                cert.tbs_certificate.subject, e
            ))
        })?;

        return Ok(Some(ProxyDescriptor {
            format,
            rights: ProxyRights::from_language(info.proxy_policy.policy_language),
            path_len: info.path_len_constraint,
        }));
    }

    let tbs = &cert.tbs_certificate;
    let legacy = match last_common_name(&tbs.subject) {
        Some(cn) if cn == LEGACY_PROXY_CN => ProxyRights::InheritAll,
        Some(cn) if cn == LEGACY_LIMITED_PROXY_CN => ProxyRights::Limited,
        _ => return Ok(None),
    };

    if !extends_by_one_component(&tbs.subject, &tbs.issuer) {
        return Ok(None);
    }

    Ok(Some(ProxyDescriptor {
        format: ProxyFormat::Legacy,
        rights: legacy,
        path_len: None,
    }))
}

/// Subject of the first non-proxy certificate, walking from the end entity
pub fn base_subject<'a>(chain: impl IntoIterator<Item = &'a Certificate>) -> Result<Name> {
    let mut end_entity = None;
    for cert in chain {
        let subject = &cert.tbs_certificate.subject;
        end_entity.get_or_insert_with(|| subject.to_string());
        if proxy_descriptor(cert)?.is_none() {
            return Ok(subject.clone());
        }
    }

    Err(ProxyError::Chain(format!(
        "No end-entity certificate below proxy '{}'",
        end_entity.unwrap_or_default()
    )))
}

/// Build the critical proxyCertInfo extension
pub fn proxy_cert_info_extension(limited: bool, path_len: Option<u32>) -> Result<Extension> {
    let info = ProxyCertInfo {
        path_len_constraint: path_len,
        proxy_policy: ProxyPolicy {
            policy_language: if limited {
                POLICY_LIMITED
            } else {
                POLICY_INHERIT_ALL
            },
            policy: None,
        },
    };

    Ok(Extension {
        extn_id: PROXY_CERT_INFO,
        critical: true,
        extn_value: OctetString::new(info.to_der()?)?,
    })
}

/// Build a critical basicConstraints extension
pub fn basic_constraints_extension(ca: bool) -> Result<Extension> {
    let constraints = BasicConstraints {
        ca,
        path_len_constraint: None,
    };

    Ok(Extension {
        extn_id: BASIC_CONSTRAINTS,
        critical: true,
        extn_value: OctetString::new(constraints.to_der()?)?,
    })
}

/// Whether the certificate asserts `cA = TRUE`
pub fn is_ca(cert: &Certificate) -> bool {
    extensions(cert)
        .find(|ext| ext.extn_id == BASIC_CONSTRAINTS)
        .and_then(|ext| BasicConstraints::from_der(ext.extn_value.as_bytes()).ok())
        .map(|bc| bc.ca)
        .unwrap_or(false)
}

fn extensions(cert: &Certificate) -> impl Iterator<Item = &Extension> {
    cert.tbs_certificate.extensions.iter().flatten()
}

/// Value of the `CN` in the last RDN of a name
pub fn last_common_name(name: &Name) -> Option<String> {
    let rdn = name.0.last()?;
    rdn.0
        .iter()
        .find(|atv| atv.oid == COMMON_NAME)
        .and_then(|atv| std::str::from_utf8(atv.value.value()).ok())
        .map(str::to_string)
}

/// True if `subject` is `issuer` plus exactly one single-valued `CN` RDN
pub fn extends_by_one_component(subject: &Name, issuer: &Name) -> bool {
    let Some((last, prefix)) = subject.0.split_last() else {
        return false;
    };

    prefix == issuer.0.as_slice()
        && last.0.len() == 1
        && last.0.iter().all(|atv| atv.oid == COMMON_NAME)
}

/// Derive a proxy subject: `base` + `CN=<serial>`
pub fn proxy_subject(base: &Name, serial: u64) -> Result<Name> {
    append_common_name(base, &serial.to_string())
}

/// `base` with one more `CN` component
pub fn append_common_name(base: &Name, common_name: &str) -> Result<Name> {
    let value = der::Any::new(der::Tag::Utf8String, common_name.as_bytes().to_vec())?;
    let cn = AttributeTypeAndValue {
        oid: COMMON_NAME,
        value,
    };

    let mut name = base.clone();
    name.0
        .push(RelativeDistinguishedName(SetOfVec::try_from(vec![cn])?));
    Ok(name)
}

/// Positive serial number from a 63-bit value
pub fn serial_number(value: u64) -> Result<SerialNumber> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut encoded = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        encoded.push(0);
    }
    encoded.extend_from_slice(&bytes[first..]);
    Ok(SerialNumber::new(&encoded)?)
}

/// Hex rendering of a certificate serial
pub fn serial_hex(cert: &Certificate) -> String {
    hex::encode(cert.tbs_certificate.serial_number.as_bytes())
}

/// Subject rendered as an RFC 4514 string
pub fn subject_string(cert: &Certificate) -> String {
    cert.tbs_certificate.subject.to_string()
}

/// Public key bound by the certificate
pub fn public_key(cert: &Certificate) -> Result<RsaPublicKey> {
    public_key_from_spki(&cert.tbs_certificate.subject_public_key_info)
}

/// Check that `cert` was signed by the holder of `issuer_key`
pub fn verify_issued_by(cert: &Certificate, issuer_key: &RsaPublicKey) -> Result<()> {
    let digest = SignatureDigest::from_algorithm(&cert.signature_algorithm)?;
    if cert.signature_algorithm != cert.tbs_certificate.signature {
        return Err(ProxyError::Chain(format!(
            "Signature algorithm mismatch inside '{}'",
            cert.tbs_certificate.subject
        )));
    }

    let tbs = cert.tbs_certificate.to_der()?;
    let signature = cert.signature.as_bytes().ok_or_else(|| {
        ProxyError::Chain(format!(
            "Signature of '{}' has unused bits",
            cert.tbs_certificate.subject
        ))
    })?;

    verify_signature(issuer_key, digest, &tbs, signature).map_err(|e| {
        ProxyError::Chain(format!(
            "'{}' not signed by '{}': {}",
            cert.tbs_certificate.subject, cert.tbs_certificate.issuer, e
        ))
    })
}

/// Sign a TBS certificate
pub fn sign_tbs(tbs: TbsCertificate, key: &PrivateKey) -> Result<Certificate> {
    let digest = SignatureDigest::from_algorithm(&tbs.signature)
        .map_err(|e| ProxyError::Signing(e.to_string()))?;
    let signature = key.sign_with(digest, &tbs.to_der()?)?;

    Ok(Certificate {
        signature_algorithm: tbs.signature.clone(),
        tbs_certificate: tbs,
        signature: BitString::from_bytes(&signature)?,
    })
}

/// Template for a v3 certificate signed with SHA-256
pub fn tbs_template(
    serial: SerialNumber,
    issuer: Name,
    subject: Name,
    key: &RsaPublicKey,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    extensions: Vec<Extension>,
) -> Result<TbsCertificate> {
    Ok(TbsCertificate {
        version: Version::V3,
        serial_number: serial,
        signature: SignatureDigest::Sha256.algorithm()?,
        issuer,
        validity: x509_cert::time::Validity {
            not_before: to_x509_time(not_before)?,
            not_after: to_x509_time(not_after)?,
        },
        subject,
        subject_public_key_info: crate::key::spki_from_public_key(key)?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: if extensions.is_empty() {
            None
        } else {
            Some(extensions)
        },
    })
}

/// Self-signed certificate, e.g. a test or site CA
pub fn self_signed(
    subject: Name,
    key: &PrivateKey,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    ca: bool,
) -> Result<Certificate> {
    let extensions = if ca {
        vec![basic_constraints_extension(true)?]
    } else {
        Vec::new()
    };

    let tbs = tbs_template(
        serial_number(1)?,
        subject.clone(),
        subject,
        &key.public_key(),
        not_before,
        not_after,
        extensions,
    )?;
    sign_tbs(tbs, key)
}

/// Start of validity
pub fn not_before(cert: &Certificate) -> Result<DateTime<Utc>> {
    from_x509_time(&cert.tbs_certificate.validity.not_before)
}

/// End of validity
pub fn not_after(cert: &Certificate) -> Result<DateTime<Utc>> {
    from_x509_time(&cert.tbs_certificate.validity.not_after)
}

/// Convert to X.509 time; UTCTime before 2050, GeneralizedTime after
pub fn to_x509_time(time: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| ProxyError::InvalidArgument(format!("Time {} predates 1970", time)))?;
    let duration = Duration::from_secs(secs);

    if time.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(duration)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(
            duration,
        )?))
    }
}

/// Convert from X.509 time
pub fn from_x509_time(time: &Time) -> Result<DateTime<Utc>> {
    let secs = i64::try_from(time.to_unix_duration().as_secs())
        .map_err(|_| ProxyError::Parse("Certificate time out of range".to_string()))?;
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| ProxyError::Parse("Certificate time out of range".to_string()))
}

/// Compact single-line summary used in log events
pub struct CertSummary<'a>(pub &'a Certificate);

impl fmt::Display for CertSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subject='{}' issuer='{}' serial={}",
            self.0.tbs_certificate.subject,
            self.0.tbs_certificate.issuer,
            serial_hex(self.0)
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Hand-built certificates for unit tests

    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::str::FromStr;

    /// Self-signed root valid for roughly a year
    pub fn self_signed(cn: &str, key: &PrivateKey) -> Certificate {
        let name = Name::from_str(&format!("CN={},O=Grid", cn)).unwrap();
        let now = Utc::now();
        super::self_signed(
            name,
            key,
            now - ChronoDuration::minutes(1),
            now + ChronoDuration::days(365),
            false,
        )
        .unwrap()
    }
}
