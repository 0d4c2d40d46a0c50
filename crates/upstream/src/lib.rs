//! Upstream registry client for the vitrine provider mirror.
//!
//! Speaks the terraform provider registry protocol: service discovery via
//! `/.well-known/terraform.json`, the "list available versions" endpoint,
//! the per-platform "find a provider package" endpoint, and archive
//! downloads. Enforces timeouts, response size caps, and a bounded retry
//! policy with exponential backoff for transient failures.

pub mod error;

pub use error::{UpstreamError, UpstreamResult};

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;
use vitrine_core::config::UpstreamConfig;
use vitrine_core::registry::{
    platform_key, PlatformPackage, ProviderVersions, VersionMetadata,
};
use vitrine_core::{ArtifactDigest, ProviderKey, VersionKey};

/// Upstream registry operations the mirror depends on.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch the "list available versions" document for a provider.
    async fn fetch_index(&self, key: &ProviderKey) -> UpstreamResult<ProviderVersions>;

    /// Fetch and assemble per-platform package metadata for one release.
    async fn fetch_version(&self, key: &VersionKey) -> UpstreamResult<VersionMetadata>;

    /// Download an archive and verify it against the expected digest.
    async fn fetch_artifact(&self, url: &Url, expected: &ArtifactDigest) -> UpstreamResult<Bytes>;
}

/// Terraform service discovery response.
#[derive(Debug, Deserialize)]
struct DiscoveredServices {
    #[serde(rename = "providers.v1")]
    providers_v1: Option<String>,
}

/// One attempt's failure, split by whether the retry loop should continue.
enum AttemptError {
    Retryable(String),
    Fatal(UpstreamError),
}

/// HTTP client for upstream terraform registries.
pub struct RegistryClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl RegistryClient {
    pub fn new(config: UpstreamConfig) -> UpstreamResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn registry_root(&self, hostname: &str) -> UpstreamResult<Url> {
        Url::parse(&format!(
            "{}://{}:{}/",
            self.config.scheme, hostname, self.config.port
        ))
        .map_err(|e| UpstreamError::BuildUrl {
            hostname: hostname.to_string(),
            reason: e.to_string(),
        })
    }

    fn join(&self, base: &Url, path: &str, hostname: &str) -> UpstreamResult<Url> {
        base.join(path).map_err(|e| UpstreamError::BuildUrl {
            hostname: hostname.to_string(),
            reason: format!("{path}: {e}"),
        })
    }

    /// One GET attempt with a size-capped body read.
    async fn try_get_bytes(
        &self,
        url: &Url,
        limit: usize,
    ) -> std::result::Result<Vec<u8>, AttemptError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(AttemptError::Fatal(UpstreamError::NotFound {
                url: url.to_string(),
            }));
        }
        if status.is_client_error() {
            return Err(AttemptError::Fatal(UpstreamError::Rejected {
                status: status.as_u16(),
                url: url.to_string(),
            }));
        }
        if !status.is_success() {
            return Err(AttemptError::Retryable(format!("status {status}")));
        }

        let mut response = response;
        let mut buffer = Vec::new();
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(AttemptError::Retryable(e.to_string())),
            };
            if buffer.len() + chunk.len() > limit {
                return Err(AttemptError::Fatal(UpstreamError::TooLarge {
                    url: url.to_string(),
                    limit,
                }));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer)
    }

    /// GET with the configured retry policy. Connect failures, timeouts, and
    /// 5xx responses are retried with exponential backoff; 4xx responses are
    /// definitive and returned immediately.
    async fn get_bytes(&self, url: &Url, limit: usize) -> UpstreamResult<Vec<u8>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_get_bytes(url, limit).await {
                Ok(bytes) => return Ok(bytes),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(reason)) => {
                    if attempt > self.config.retries {
                        return Err(UpstreamError::Unavailable { attempts: attempt, reason });
                    }
                    let backoff = self.config.backoff(attempt);
                    tracing::debug!(
                        %url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        %reason,
                        "transient upstream failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url, limit: usize) -> UpstreamResult<T> {
        let bytes = self.get_bytes(url, limit).await?;
        serde_json::from_slice(&bytes).map_err(|source| UpstreamError::Malformed {
            url: url.to_string(),
            source,
        })
    }

    /// Resolve the providers.v1 base URL via terraform service discovery.
    async fn providers_base(&self, hostname: &str) -> UpstreamResult<Url> {
        let root = self.registry_root(hostname)?;
        let url = self.join(&root, ".well-known/terraform.json", hostname)?;
        tracing::debug!(%url, "discovering terraform services");
        let services: DiscoveredServices =
            self.get_json(&url, self.config.discovery_max_bytes).await?;
        let mut base = services
            .providers_v1
            .ok_or_else(|| UpstreamError::ServiceNotSupported {
                hostname: hostname.to_string(),
            })?;
        if !base.ends_with('/') {
            base.push('/');
        }
        self.join(&root, &base, hostname)
    }
}

#[async_trait]
impl UpstreamClient for RegistryClient {
    async fn fetch_index(&self, key: &ProviderKey) -> UpstreamResult<ProviderVersions> {
        let base = self.providers_base(key.hostname()).await?;
        let path = format!("{}/{}/versions", key.namespace(), key.provider_type());
        let url = self.join(&base, &path, key.hostname())?;
        tracing::debug!(%url, "GET provider versions");
        self.get_json(&url, self.config.metadata_max_bytes).await
    }

    async fn fetch_version(&self, key: &VersionKey) -> UpstreamResult<VersionMetadata> {
        let provider = key.provider();
        let base = self.providers_base(provider.hostname()).await?;

        let path = format!(
            "{}/{}/versions",
            provider.namespace(),
            provider.provider_type()
        );
        let url = self.join(&base, &path, provider.hostname())?;
        let versions: ProviderVersions =
            self.get_json(&url, self.config.metadata_max_bytes).await?;

        let Some(item) = versions.find(key.version()) else {
            return Err(UpstreamError::NotFound { url: url.to_string() });
        };

        let mut platforms = BTreeMap::new();
        for platform in &item.platforms {
            let path = format!(
                "{}/{}/{}/download/{}/{}",
                provider.namespace(),
                provider.provider_type(),
                key.version(),
                platform.os,
                platform.arch
            );
            let url = self.join(&base, &path, provider.hostname())?;
            tracing::debug!(%url, "GET provider package");
            let package: vitrine_core::registry::ProviderPackage =
                self.get_json(&url, self.config.metadata_max_bytes).await?;
            platforms.insert(
                platform_key(&package.os, &package.arch),
                PlatformPackage {
                    filename: package.filename,
                    download_url: package.download_url,
                    shasum: package.shasum,
                    signing_keys: package.signing_keys,
                },
            );
        }

        Ok(VersionMetadata { platforms })
    }

    async fn fetch_artifact(&self, url: &Url, expected: &ArtifactDigest) -> UpstreamResult<Bytes> {
        tracing::debug!(%url, %expected, "GET provider archive");
        let bytes = self.get_bytes(url, self.config.artifact_max_bytes).await?;
        let actual = ArtifactDigest::compute(&bytes);
        if actual != *expected {
            return Err(UpstreamError::ChecksumMismatch {
                url: url.to_string(),
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(Bytes::from(bytes))
    }
}
