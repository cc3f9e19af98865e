//! Error types for proxy delegation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy delegation and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Malformed PEM/DER input or missing credential parts
    #[error("Parse error: {0}")]
    Parse(String),

    /// Wrong or missing passphrase for an encrypted private key
    #[error("Decrypt error: {0}")]
    Decrypt(String),

    /// Key generation failed or timed out
    #[error("Key generation failed: {0}")]
    KeyGen(String),

    /// Returned certificate does not carry the requested public key
    #[error("Public key mismatch: {0}")]
    KeyMismatch(String),

    /// Delegation request could not be parsed or is not acceptable
    #[error("Malformed delegation request: {0}")]
    MalformedRequest(String),

    /// Signing key absent or unusable
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Certificate is past its notAfter
    #[error("Certificate '{subject}' expired at {not_after}")]
    Expired {
        /// Subject of the offending certificate
        subject: String,
        /// Expiration time
        not_after: DateTime<Utc>,
    },

    /// Certificate is before its notBefore
    #[error("Certificate '{subject}' not valid before {not_before}")]
    NotYetValid {
        /// Subject of the offending certificate
        subject: String,
        /// Start of validity
        not_before: DateTime<Utc>,
    },

    /// Signature, name chaining or proxy rules violated
    #[error("Chain error: {0}")]
    Chain(String),

    /// Trust store confirmed revocation
    #[error("Certificate '{subject}' (serial {serial}) revoked: {reason}")]
    Revoked {
        /// Subject of the revoked certificate
        subject: String,
        /// Hex serial number
        serial: String,
        /// Reason reported by the trust store
        reason: String,
    },

    /// Revocation source unreachable
    #[error("Revocation status unavailable: {0}")]
    SoftFail(String),

    /// Destination already exists
    #[error("Refusing to overwrite existing file {}", .path.display())]
    IoConflict {
        /// Destination path
        path: PathBuf,
    },

    /// Filesystem operation failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Structured error kind, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`ProxyError::Parse`]
    Parse,
    /// See [`ProxyError::Decrypt`]
    Decrypt,
    /// See [`ProxyError::KeyGen`]
    KeyGen,
    /// See [`ProxyError::KeyMismatch`]
    KeyMismatch,
    /// See [`ProxyError::MalformedRequest`]
    MalformedRequest,
    /// See [`ProxyError::Signing`]
    Signing,
    /// See [`ProxyError::Expired`]
    Expired,
    /// See [`ProxyError::NotYetValid`]
    NotYetValid,
    /// See [`ProxyError::Chain`]
    Chain,
    /// See [`ProxyError::Revoked`]
    Revoked,
    /// See [`ProxyError::SoftFail`]
    SoftFail,
    /// See [`ProxyError::IoConflict`]
    IoConflict,
    /// See [`ProxyError::Io`]
    Io,
    /// See [`ProxyError::InvalidArgument`]
    InvalidArgument,
    /// See [`ProxyError::Config`]
    Config,
}

impl ProxyError {
    /// Get the structured kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Parse(_) => ErrorKind::Parse,
            ProxyError::Decrypt(_) => ErrorKind::Decrypt,
            ProxyError::KeyGen(_) => ErrorKind::KeyGen,
            ProxyError::KeyMismatch(_) => ErrorKind::KeyMismatch,
            ProxyError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            ProxyError::Signing(_) => ErrorKind::Signing,
            ProxyError::Expired { .. } => ErrorKind::Expired,
            ProxyError::NotYetValid { .. } => ErrorKind::NotYetValid,
            ProxyError::Chain(_) => ErrorKind::Chain,
            ProxyError::Revoked { .. } => ErrorKind::Revoked,
            ProxyError::SoftFail(_) => ErrorKind::SoftFail,
            ProxyError::IoConflict { .. } => ErrorKind::IoConflict,
            ProxyError::Io { .. } => ErrorKind::Io,
            ProxyError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ProxyError::Config(_) => ErrorKind::Config,
        }
    }

    /// Check if error is retryable
    ///
    /// Nothing is retried internally; this only tells the caller which
    /// failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProxyError::SoftFail(_) => true,
            ProxyError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::AlreadyExists {
            ProxyError::IoConflict { path }
        } else {
            ProxyError::Io { path, source }
        }
    }
}

impl From<der::Error> for ProxyError {
    fn from(err: der::Error) -> Self {
        ProxyError::Parse(format!("DER error: {}", err))
    }
}

impl From<pem::PemError> for ProxyError {
    fn from(err: pem::PemError) -> Self {
        ProxyError::Parse(format!("PEM error: {}", err))
    }
}
