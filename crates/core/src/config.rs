//! Configuration types shared across crates.
//!
//! Loaded once at startup from a TOML file merged with `VITRINE_`-prefixed
//! environment variables; every field has a serde default so a minimal config
//! only needs the redirect base URL and a storage section.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
}

impl AppConfig {
    /// Validate cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        self.server.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP service.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL clients reach this mirror at; archive URLs in version
    /// documents are rewritten under it. Terraform requires mirrors behind
    /// TLS, so in production this is the terminating proxy's URL.
    #[serde(default = "default_redirect_base")]
    pub redirect_base: Url,
}

impl ServerConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.redirect_base.cannot_be_a_base() {
            return Err(crate::Error::Config(
                "server.redirect_base must be a fully qualified URL".to_string(),
            ));
        }
        if !self.redirect_base.as_str().ends_with('/') {
            return Err(crate::Error::Config(
                "server.redirect_base must end with a trailing slash".to_string(),
            ));
        }
        Ok(())
    }
}

/// Upstream registry client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Scheme for upstream requests. Terraform registries are HTTPS only;
    /// overriding to "http" exists for tests against a local mock registry.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Upstream registry port. Only ever changed in tests.
    #[serde(default = "default_registry_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retry attempts after the first failure, for transient errors only.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Size cap for service discovery responses.
    #[serde(default = "default_discovery_max_bytes")]
    pub discovery_max_bytes: usize,
    /// Size cap for index/version metadata responses.
    #[serde(default = "default_metadata_max_bytes")]
    pub metadata_max_bytes: usize,
    /// Size cap for provider archive downloads.
    #[serde(default = "default_artifact_max_bytes")]
    pub artifact_max_bytes: usize,
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff before retry attempt `attempt` (1-based), doubling from the
    /// initial delay up to the configured cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .backoff_initial_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

/// Cache index configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path for the cache index.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Index entries serve stale past this age while a refresh runs.
    #[serde(default = "default_index_ttl_secs")]
    pub index_ttl_secs: u64,
    /// Version entries are never served past this age without revalidation.
    #[serde(default = "default_version_ttl_secs")]
    pub version_ttl_secs: u64,
    /// Lifetime of cached upstream 404s.
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,
}

impl CacheConfig {
    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_secs)
    }

    pub fn version_ttl(&self) -> Duration {
        Duration::from_secs(self.version_ttl_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }
}

/// Artifact storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for stored artifacts.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        bucket: String,
        /// Optional endpoint URL (for MinIO, localstack, etc.).
        endpoint: Option<String>,
        region: Option<String>,
        /// Optional object key prefix.
        prefix: Option<String>,
        /// Falls back to the ambient AWS credential chain if unset.
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        /// Path-style URLs, required for MinIO and some S3 compatibles.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl StorageConfig {
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            StorageConfig::Filesystem { .. } => Ok(()),
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err(crate::Error::Config(
                        "storage.bucket must not be empty".to_string(),
                    ));
                }
                if access_key_id.is_some() != secret_access_key.is_some() {
                    return Err(crate::Error::Config(
                        "storage.access_key_id and storage.secret_access_key must be set together"
                            .to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Eviction sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Storage bound in bytes. Unset means the cache is unbounded and no
    /// sweep task runs.
    #[serde(default)]
    pub max_total_bytes: Option<u64>,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl EvictionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_bind() -> String {
    "127.0.0.1:9543".to_string()
}

fn default_redirect_base() -> Url {
    Url::parse("http://127.0.0.1:9543/").expect("static URL parses")
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_registry_port() -> u16 {
    443
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    100
}

fn default_backoff_cap_ms() -> u64 {
    2_000
}

fn default_discovery_max_bytes() -> usize {
    16 * 1024
}

fn default_metadata_max_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_artifact_max_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/index.db")
}

fn default_index_ttl_secs() -> u64 {
    3_600
}

fn default_version_ttl_secs() -> u64 {
    86_400
}

fn default_negative_ttl_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            redirect_base: default_redirect_base(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            port: default_registry_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retries: default_retries(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            discovery_max_bytes: default_discovery_max_bytes(),
            metadata_max_bytes: default_metadata_max_bytes(),
            artifact_max_bytes: default_artifact_max_bytes(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_ttl_secs: default_index_ttl_secs(),
            version_ttl_secs: default_version_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/artifacts"),
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: None,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}
