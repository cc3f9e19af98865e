//! Delegation and validation configuration
//!
//! Both structures are plain values owned by the caller; nothing here is
//! process-global. They can be built in code or loaded from TOML:
//!
//! ```toml
//! [delegation]
//! default_lifetime = "12h"
//! default_key_bits = 2048
//! clock_skew = "5m"
//! keygen_timeout = "60s"
//!
//! [validation]
//! require_limited_propagation = true
//! allow_soft_fail = false
//! clock_skew = "0s"
//! ```

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Default proxy lifetime (12 hours)
pub const DEFAULT_PROXY_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Default RSA modulus size for generated proxy keys
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Backdating applied to proxy notBefore to tolerate clock drift
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

/// Default bound on key generation
pub const DEFAULT_KEYGEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Delegation engine settings
    #[serde(default)]
    pub delegation: DelegationConfig,

    /// Validation engine settings
    #[serde(default)]
    pub validation: ValidationPolicy,
}

impl Config {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {}", e)))?;

        config.delegation.check()?;

        Ok(config)
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&content)
    }
}

/// Delegation engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DelegationConfig {
    /// Lifetime used when a restriction set asks for the default (0 seconds)
    #[serde(with = "humantime_serde")]
    pub default_lifetime: Duration,

    /// Key size used when it cannot be inherited from the source credential
    #[validate(range(min = 512, max = 16384))]
    pub default_key_bits: usize,

    /// Amount by which a proxy's notBefore is backdated
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Upper bound for bounded key generation
    #[serde(with = "humantime_serde")]
    pub keygen_timeout: Duration,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            default_lifetime: DEFAULT_PROXY_LIFETIME,
            default_key_bits: DEFAULT_KEY_BITS,
            clock_skew: DEFAULT_CLOCK_SKEW,
            keygen_timeout: DEFAULT_KEYGEN_TIMEOUT,
        }
    }
}

impl DelegationConfig {
    /// Validate field ranges
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| ProxyError::Config(format!("Invalid delegation config: {}", e)))?;

        if self.default_lifetime.is_zero() {
            return Err(ProxyError::Config(
                "default_lifetime must be greater than zero".to_string(),
            ));
        }

        if self.keygen_timeout.is_zero() {
            return Err(ProxyError::Config(
                "keygen_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Verifier-side policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Reject a non-limited proxy issued by a limited proxy
    pub require_limited_propagation: bool,

    /// Accept an unreachable revocation source instead of failing
    pub allow_soft_fail: bool,

    /// Tolerance applied to both ends of each validity window
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            require_limited_propagation: true,
            allow_soft_fail: false,
            clock_skew: Duration::ZERO,
        }
    }
}
