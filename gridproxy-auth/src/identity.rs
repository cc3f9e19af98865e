//! Base identity for delegation
//!
//! An [`IdentityProvider`] is constructed explicitly, handed to whatever needs
//! the caller's credential, and torn down when no longer needed. There is no
//! process-wide credential.

use crate::credentials::CredentialContainer;
use crate::error::{ProxyError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the user's proxy file
pub const PROXY_PATH_ENV: &str = "X509_USER_PROXY";

/// Source of the credential used as the base of a delegation
pub trait IdentityProvider {
    /// The base credential
    fn credential(&self) -> &CredentialContainer;
}

/// Identity read from a credential file
#[derive(Debug)]
pub struct FileIdentityProvider {
    path: PathBuf,
    credential: CredentialContainer,
}

impl FileIdentityProvider {
    /// Load the credential at `path`
    pub fn open(path: impl AsRef<Path>, passphrase: Option<&[u8]>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let credential = CredentialContainer::from_file(&path, passphrase)?;

        info!(
            path = %path.display(),
            subject = %credential.subject(),
            "Identity opened"
        );
        Ok(Self { path, credential })
    }

    /// Load the credential named by `X509_USER_PROXY`
    pub fn from_env(passphrase: Option<&[u8]>) -> Result<Self> {
        let path = std::env::var_os(PROXY_PATH_ENV)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ProxyError::Config(format!("{} is not set", PROXY_PATH_ENV)))?;
        Self::open(PathBuf::from(path), passphrase)
    }

    /// File the credential was read from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the identity, wiping its private key
    pub fn teardown(self) {
        info!(path = %self.path.display(), "Identity closed");
        self.credential.destroy();
    }
}

impl IdentityProvider for FileIdentityProvider {
    fn credential(&self) -> &CredentialContainer {
        &self.credential
    }
}

impl IdentityProvider for CredentialContainer {
    fn credential(&self) -> &CredentialContainer {
        self
    }
}
