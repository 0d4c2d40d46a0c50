//! Cache index records and the freshness model.

use vitrine_core::registry::{ProviderVersions, VersionMetadata};

/// Freshness of a present record. Absence is expressed by `Option::None`
/// at the lookup site, completing the tri-state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Within TTL; serve directly.
    Fresh,
    /// Past TTL. Index entries serve stale while a refresh runs; version
    /// entries must revalidate before serving.
    Stale,
}

/// Classify a record fetched at `fetched_at` against a TTL, both in unix
/// seconds. A record is fresh while `now - fetched_at < ttl`.
pub fn freshness(fetched_at: i64, ttl_secs: i64, now: i64) -> Freshness {
    if now.saturating_sub(fetched_at) < ttl_secs {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

/// Cached "list available versions" result for a provider.
#[derive(Clone, Debug)]
pub struct IndexRecord {
    /// The upstream document; `None` for a negative (404) record.
    pub document: Option<ProviderVersions>,
    pub negative: bool,
    /// Unix seconds of the fetch that produced this record.
    pub fetched_at: i64,
}

impl IndexRecord {
    pub fn freshness(&self, ttl_secs: i64, now: i64) -> Freshness {
        freshness(self.fetched_at, ttl_secs, now)
    }
}

/// Cached per-platform package metadata for one provider release.
#[derive(Clone, Debug)]
pub struct VersionRecord {
    /// The assembled metadata; `None` for a negative (404) record.
    pub document: Option<VersionMetadata>,
    pub negative: bool,
    pub fetched_at: i64,
}

impl VersionRecord {
    pub fn freshness(&self, ttl_secs: i64, now: i64) -> Freshness {
        freshness(self.fetched_at, ttl_secs, now)
    }
}
