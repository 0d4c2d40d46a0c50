//! The mirror service: the one surface the request-handling layer calls.

use crate::error::{MirrorError, MirrorResult};
use crate::singleflight::{FlightError, Singleflight};
use bytes::Bytes;
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;
use vitrine_core::config::CacheConfig;
use vitrine_core::registry::{MirrorIndex, MirrorVersion, ProviderVersions, VersionMetadata};
use vitrine_core::{ArtifactDigest, ProviderKey, VersionKey};
use vitrine_index::{CacheIndex, Freshness};
use vitrine_store::{ArtifactStore, StoreError, SweepStats};
use vitrine_upstream::{UpstreamClient, UpstreamError};

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// TTLs per entry kind, in seconds. Configured once, not per entry.
#[derive(Clone, Copy, Debug)]
pub struct CacheTtls {
    pub index_secs: i64,
    pub version_secs: i64,
    pub negative_secs: i64,
}

impl From<&CacheConfig> for CacheTtls {
    fn from(config: &CacheConfig) -> Self {
        Self {
            index_secs: config.index_ttl_secs as i64,
            version_secs: config.version_ttl_secs as i64,
            negative_secs: config.negative_ttl_secs as i64,
        }
    }
}

struct Flights {
    index: Singleflight<String, ProviderVersions, MirrorError>,
    version: Singleflight<String, VersionMetadata, MirrorError>,
    artifact: Singleflight<ArtifactDigest, Bytes, MirrorError>,
}

/// Orchestrates cache index, artifact store, and upstream client to answer
/// index, version, and artifact queries.
///
/// Index entries follow stale-while-revalidate: a stale entry is served
/// immediately and refreshed in the background. Version entries carry
/// download checksums, so their TTL is strict: an expired entry is
/// revalidated synchronously and never served past expiry. Upstream 404s
/// are cached as negative entries with their own short TTL.
#[derive(Clone)]
pub struct MirrorService {
    index: Arc<dyn CacheIndex>,
    store: ArtifactStore,
    upstream: Arc<dyn UpstreamClient>,
    ttls: CacheTtls,
    redirect_base: Url,
    flights: Arc<Flights>,
}

impl MirrorService {
    pub fn new(
        index: Arc<dyn CacheIndex>,
        store: ArtifactStore,
        upstream: Arc<dyn UpstreamClient>,
        ttls: CacheTtls,
        redirect_base: Url,
    ) -> Self {
        Self {
            index,
            store,
            upstream,
            ttls,
            redirect_base,
            flights: Arc::new(Flights {
                index: Singleflight::new(),
                version: Singleflight::new(),
                artifact: Singleflight::new(),
            }),
        }
    }

    /// Answer a provider index query.
    pub async fn get_index(&self, key: &ProviderKey) -> MirrorResult<MirrorIndex> {
        let now = unix_now();
        match self.index.get_index(key).await? {
            Some(record) if record.negative => {
                if record.freshness(self.ttls.negative_secs, now) == Freshness::Fresh {
                    tracing::debug!(key = %key, "negative cache hit for index");
                    return Err(MirrorError::NotFound);
                }
                // Expired negative entry: treat as absent.
            }
            Some(record) => {
                let document = record.document.as_ref().ok_or_else(|| {
                    MirrorError::StorageFailure("positive index entry without document".to_string())
                })?;
                let response = MirrorIndex::from(document);
                if record.freshness(self.ttls.index_secs, now) == Freshness::Stale {
                    tracing::debug!(key = %key, "serving stale index, scheduling refresh");
                    self.spawn_index_refresh(key.clone());
                }
                return Ok(response);
            }
            None => {}
        }

        let document = self.refresh_index(key).await.map_err(MirrorError::from)?;
        Ok(MirrorIndex::from(&document))
    }

    /// Answer a provider version query.
    pub async fn get_version(&self, key: &VersionKey) -> MirrorResult<MirrorVersion> {
        let now = unix_now();
        match self.index.get_version(key).await? {
            Some(record) if record.negative => {
                if record.freshness(self.ttls.negative_secs, now) == Freshness::Fresh {
                    tracing::debug!(key = %key, "negative cache hit for version");
                    return Err(MirrorError::NotFound);
                }
            }
            Some(record) => {
                // Strict TTL: an expired version entry is revalidated below,
                // never served as-is.
                if record.freshness(self.ttls.version_secs, now) == Freshness::Fresh {
                    let document = record.document.as_ref().ok_or_else(|| {
                        MirrorError::StorageFailure(
                            "positive version entry without document".to_string(),
                        )
                    })?;
                    return Ok(MirrorVersion::build(document, &self.redirect_base));
                }
            }
            None => {}
        }

        let document = self.refresh_version(key).await.map_err(MirrorError::from)?;
        Ok(MirrorVersion::build(&document, &self.redirect_base))
    }

    /// Serve an artifact by content address, fetching it from its recorded
    /// upstream source on first access.
    pub async fn get_artifact(&self, digest: &ArtifactDigest) -> MirrorResult<Bytes> {
        match self.store.get(digest).await {
            Ok(bytes) => return Ok(bytes),
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        let Some(source) = self.index.artifact_source(digest).await? else {
            tracing::debug!(%digest, "artifact has no recorded upstream source");
            return Err(MirrorError::NotFound);
        };

        let bytes = self
            .flights
            .artifact
            .run(*digest, || async {
                // A just-completed flight may have stored it after our miss.
                match self.store.get(digest).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(StoreError::NotFound(_)) => {}
                    Err(err) => return Err(MirrorError::from(err)),
                }
                let bytes = self
                    .upstream
                    .fetch_artifact(&source, digest)
                    .await
                    .map_err(MirrorError::from)?;
                // Publish before returning so the entry is only ever
                // observable with its bytes durably stored.
                self.store.put_verified(bytes.clone(), digest).await?;
                tracing::info!(%digest, size = bytes.len(), "artifact mirrored");
                Ok(bytes)
            })
            .await
            .map_err(MirrorError::from)?;
        Ok(bytes)
    }

    /// Run one eviction pass against the configured bound, protecting
    /// artifacts referenced by live version entries.
    pub async fn evict(&self, max_total_bytes: u64) -> MirrorResult<SweepStats> {
        let live = self
            .index
            .live_digests(self.ttls.version_secs, unix_now())
            .await?;
        Ok(self.store.sweep(max_total_bytes, &live).await?)
    }

    /// Check that the index and store behind this service are usable.
    pub async fn health_check(&self) -> MirrorResult<()> {
        self.index.health_check().await?;
        self.store.health_check().await?;
        Ok(())
    }

    fn spawn_index_refresh(&self, key: ProviderKey) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(err) = service.refresh_index(&key).await {
                // Stale data was already served; the failure is only
                // reported here, out of band.
                tracing::warn!(key = %key, reason = %err, "background index refresh failed");
            }
        });
    }

    /// Coordinated index fetch: concurrent callers for the same provider
    /// collapse into one upstream request, and background refreshes share
    /// the flight key with synchronous fetches.
    async fn refresh_index(
        &self,
        key: &ProviderKey,
    ) -> Result<ProviderVersions, FlightError<MirrorError>> {
        self.flights
            .index
            .run(key.cache_key(), || async {
                match self.upstream.fetch_index(key).await {
                    Ok(document) => {
                        self.index.put_index(key, &document, unix_now()).await?;
                        Ok(document)
                    }
                    Err(UpstreamError::NotFound { .. }) => {
                        self.index.put_index_negative(key, unix_now()).await?;
                        Err(MirrorError::NotFound)
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }

    async fn refresh_version(
        &self,
        key: &VersionKey,
    ) -> Result<VersionMetadata, FlightError<MirrorError>> {
        self.flights
            .version
            .run(key.cache_key(), || async {
                match self.upstream.fetch_version(key).await {
                    Ok(document) => {
                        self.index.put_version(key, &document, unix_now()).await?;
                        Ok(document)
                    }
                    Err(UpstreamError::NotFound { .. }) => {
                        self.index.put_version_negative(key, unix_now()).await?;
                        Err(MirrorError::NotFound)
                    }
                    Err(err) => Err(err.into()),
                }
            })
            .await
    }
}
