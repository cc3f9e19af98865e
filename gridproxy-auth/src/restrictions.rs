//! Restrictions applied when signing a proxy

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Restrictions the issuer places on a proxy it signs
///
/// A lifetime of zero means "use the engine default". Lifetimes longer than
/// the issuer's remaining validity are clamped at signing time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictionSet {
    lifetime_seconds: u64,
    limited: bool,
    path_length: Option<u32>,
}

impl RestrictionSet {
    /// Unrestricted proxy with the default lifetime
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested lifetime in seconds (0 resets to the default)
    pub fn set_lifetime(&mut self, seconds: i64) -> Result<()> {
        self.lifetime_seconds = u64::try_from(seconds).map_err(|_| {
            ProxyError::InvalidArgument(format!("Negative proxy lifetime: {}s", seconds))
        })?;
        Ok(())
    }

    /// Mark the proxy as limited
    pub fn set_limited(&mut self, limited: bool) {
        self.limited = limited;
    }

    /// Constrain how many further proxies may be chained below this one
    pub fn set_path_length(&mut self, path_length: Option<u32>) {
        self.path_length = path_length;
    }

    /// Builder form of [`Self::set_lifetime`]
    pub fn with_lifetime(mut self, seconds: i64) -> Result<Self> {
        self.set_lifetime(seconds)?;
        Ok(self)
    }

    /// Builder form of [`Self::set_limited`]
    pub fn with_limited(mut self, limited: bool) -> Self {
        self.limited = limited;
        self
    }

    /// Requested lifetime, `None` meaning the default
    pub fn lifetime(&self) -> Option<Duration> {
        (self.lifetime_seconds > 0).then(|| Duration::from_secs(self.lifetime_seconds))
    }

    /// Whether the proxy is limited
    pub fn limited(&self) -> bool {
        self.limited
    }

    /// Path length constraint
    pub fn path_length(&self) -> Option<u32> {
        self.path_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let restrictions = RestrictionSet::new();
        assert_eq!(restrictions.lifetime(), None);
        assert!(!restrictions.limited());
        assert_eq!(restrictions.path_length(), None);
    }

    #[test]
    fn test_lifetime() {
        let mut restrictions = RestrictionSet::new();
        restrictions.set_lifetime(3600).unwrap();
        assert_eq!(restrictions.lifetime(), Some(Duration::from_secs(3600)));

        restrictions.set_lifetime(0).unwrap();
        assert_eq!(restrictions.lifetime(), None);
    }

    #[test]
    fn test_negative_lifetime_rejected() {
        let mut restrictions = RestrictionSet::new().with_lifetime(60).unwrap();
        let err = restrictions.set_lifetime(-1).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidArgument(_)));
        assert_eq!(restrictions.lifetime(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_limited_and_path_length() {
        let mut restrictions = RestrictionSet::new().with_limited(true);
        restrictions.set_path_length(Some(0));
        assert!(restrictions.limited());
        assert_eq!(restrictions.path_length(), Some(0));
    }
}
