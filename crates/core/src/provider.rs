//! Provider request keys.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

fn valid_hostname(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.starts_with('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

fn valid_version(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '+' || c == '-')
}

/// Identifies a provider family on a registry host.
///
/// Immutable once constructed; the string form partitions the cache index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    hostname: String,
    namespace: String,
    provider_type: String,
}

impl ProviderKey {
    /// Validate and construct a provider key.
    ///
    /// Rejects anything that could not be a registry hostname or a provider
    /// address segment, so a malformed request never reaches the upstream
    /// client or the index key space.
    pub fn new(
        hostname: impl Into<String>,
        namespace: impl Into<String>,
        provider_type: impl Into<String>,
    ) -> Result<Self> {
        let hostname = hostname.into();
        let namespace = namespace.into();
        let provider_type = provider_type.into();
        if !valid_hostname(&hostname) {
            return Err(Error::InvalidKey(format!("bad hostname: {hostname:?}")));
        }
        if !valid_segment(&namespace) {
            return Err(Error::InvalidKey(format!("bad namespace: {namespace:?}")));
        }
        if !valid_segment(&provider_type) {
            return Err(Error::InvalidKey(format!(
                "bad provider type: {provider_type:?}"
            )));
        }
        Ok(Self {
            hostname,
            namespace,
            provider_type,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn provider_type(&self) -> &str {
        &self.provider_type
    }

    /// Stable string form used as the cache index key.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.hostname, self.namespace, self.provider_type)
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.provider_type)
    }
}

/// Identifies one provider release.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionKey {
    provider: ProviderKey,
    version: String,
}

impl VersionKey {
    /// Validate and construct a version key.
    pub fn new(provider: ProviderKey, version: impl Into<String>) -> Result<Self> {
        let version = version.into();
        if !valid_version(&version) {
            return Err(Error::InvalidKey(format!("bad version: {version:?}")));
        }
        Ok(Self { provider, version })
    }

    pub fn provider(&self) -> &ProviderKey {
        &self.provider
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stable string form used as the cache index key.
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.provider.cache_key(), self.version)
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.version)
    }
}
