//! Mirror service behavior over a real index and store with a stub upstream.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;
use vitrine_core::registry::{
    platform_key, PlatformPackage, ProviderPlatform, ProviderVersionItem, ProviderVersions,
    SigningKeys, VersionMetadata,
};
use vitrine_core::{ArtifactDigest, ProviderKey, VersionKey};
use vitrine_index::{CacheIndex, SqliteIndex};
use vitrine_mirror::{CacheTtls, MirrorError, MirrorService};
use vitrine_store::{ArtifactStore, FilesystemBackend};
use vitrine_upstream::{UpstreamClient, UpstreamError, UpstreamResult};

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn provider() -> ProviderKey {
    ProviderKey::new("registry.terraform.io", "hashicorp", "aws").unwrap()
}

fn version_key(version: &str) -> VersionKey {
    VersionKey::new(provider(), version).unwrap()
}

fn versions_doc(versions: &[&str]) -> ProviderVersions {
    ProviderVersions {
        versions: versions
            .iter()
            .map(|v| ProviderVersionItem {
                version: v.to_string(),
                protocols: vec!["6.0".to_string()],
                platforms: vec![ProviderPlatform {
                    os: "linux".to_string(),
                    arch: "amd64".to_string(),
                }],
            })
            .collect(),
    }
}

fn version_metadata(shasum: &str) -> VersionMetadata {
    VersionMetadata {
        platforms: BTreeMap::from([(
            platform_key("linux", "amd64"),
            PlatformPackage {
                filename: "terraform-provider-aws_5.0.0_linux_amd64.zip".to_string(),
                download_url: "https://releases.example.com/aws.zip".parse().unwrap(),
                shasum: shasum.to_string(),
                signing_keys: SigningKeys::default(),
            },
        )]),
    }
}

/// How the stub answers the next calls.
#[derive(Clone, Copy)]
enum Mode {
    Ok,
    NotFound,
    Unavailable,
}

struct StubUpstream {
    mode: Mutex<Mode>,
    index_doc: Mutex<ProviderVersions>,
    version_doc: Mutex<VersionMetadata>,
    artifact: Mutex<Bytes>,
    delay: Duration,
    index_calls: AtomicUsize,
    version_calls: AtomicUsize,
    artifact_calls: AtomicUsize,
}

impl StubUpstream {
    fn new() -> Self {
        Self {
            mode: Mutex::new(Mode::Ok),
            index_doc: Mutex::new(versions_doc(&["5.0.0"])),
            version_doc: Mutex::new(version_metadata(
                &ArtifactDigest::compute(b"default artifact").to_hex(),
            )),
            artifact: Mutex::new(Bytes::from_static(b"default artifact")),
            delay: Duration::from_millis(10),
            index_calls: AtomicUsize::new(0),
            version_calls: AtomicUsize::new(0),
            artifact_calls: AtomicUsize::new(0),
        }
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn set_index_doc(&self, doc: ProviderVersions) {
        *self.index_doc.lock().unwrap() = doc;
    }

    fn set_artifact(&self, bytes: Bytes) {
        *self.artifact.lock().unwrap() = bytes;
    }

    fn set_version_doc(&self, doc: VersionMetadata) {
        *self.version_doc.lock().unwrap() = doc;
    }

    fn fail(&self) -> UpstreamError {
        UpstreamError::Unavailable {
            attempts: 4,
            reason: "stubbed outage".to_string(),
        }
    }
}

#[async_trait]
impl UpstreamClient for StubUpstream {
    async fn fetch_index(&self, _key: &ProviderKey) -> UpstreamResult<ProviderVersions> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match *self.mode.lock().unwrap() {
            Mode::Ok => Ok(self.index_doc.lock().unwrap().clone()),
            Mode::NotFound => Err(UpstreamError::NotFound {
                url: "stub://versions".to_string(),
            }),
            Mode::Unavailable => Err(self.fail()),
        }
    }

    async fn fetch_version(&self, _key: &VersionKey) -> UpstreamResult<VersionMetadata> {
        self.version_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match *self.mode.lock().unwrap() {
            Mode::Ok => Ok(self.version_doc.lock().unwrap().clone()),
            Mode::NotFound => Err(UpstreamError::NotFound {
                url: "stub://download".to_string(),
            }),
            Mode::Unavailable => Err(self.fail()),
        }
    }

    async fn fetch_artifact(
        &self,
        url: &Url,
        expected: &ArtifactDigest,
    ) -> UpstreamResult<Bytes> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match *self.mode.lock().unwrap() {
            Mode::Ok => {
                let bytes = self.artifact.lock().unwrap().clone();
                let actual = ArtifactDigest::compute(&bytes);
                if actual != *expected {
                    return Err(UpstreamError::ChecksumMismatch {
                        url: url.to_string(),
                        expected: expected.to_hex(),
                        actual: actual.to_hex(),
                    });
                }
                Ok(bytes)
            }
            Mode::NotFound => Err(UpstreamError::NotFound {
                url: url.to_string(),
            }),
            Mode::Unavailable => Err(self.fail()),
        }
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    service: MirrorService,
    index: Arc<SqliteIndex>,
    store: ArtifactStore,
    upstream: Arc<StubUpstream>,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(SqliteIndex::new(dir.path().join("index.db")).await.unwrap());
    let backend = FilesystemBackend::new(dir.path().join("artifacts")).await.unwrap();
    let store = ArtifactStore::new(Arc::new(backend));
    let upstream = Arc::new(StubUpstream::new());
    let service = MirrorService::new(
        index.clone(),
        store.clone(),
        upstream.clone(),
        CacheTtls {
            index_secs: 60,
            version_secs: 60,
            negative_secs: 60,
        },
        "https://mirror.test/".parse().unwrap(),
    );
    Fixture {
        _dir: dir,
        service,
        index,
        store,
        upstream,
    }
}

#[tokio::test]
async fn version_fetch_populates_cache_and_serves_from_it() {
    let f = fixture().await;
    let key = version_key("5.0.0");

    let doc = f.service.get_version(&key).await.unwrap();
    assert!(doc.archives.contains_key("linux_amd64"));
    assert_eq!(f.upstream.version_calls.load(Ordering::SeqCst), 1);

    // Second request is a fresh cache hit; no further upstream traffic.
    let doc = f.service.get_version(&key).await.unwrap();
    let digest = ArtifactDigest::compute(b"default artifact").to_hex();
    assert_eq!(
        doc.archives["linux_amd64"].url,
        format!("https://mirror.test/artifacts/{digest}")
    );
    assert_eq!(f.upstream.version_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_version_requests_share_one_upstream_fetch() {
    let f = fixture().await;
    let key = version_key("5.0.0");

    let (a, b) = tokio::join!(f.service.get_version(&key), f.service.get_version(&key));
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(
        a.archives["linux_amd64"].url,
        b.archives["linux_amd64"].url
    );
    assert_eq!(f.upstream.version_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn upstream_404_is_negative_cached() {
    let f = fixture().await;
    f.upstream.set_mode(Mode::NotFound);
    let key = version_key("9.9.9");

    match f.service.get_version(&key).await {
        Err(MirrorError::NotFound) => {}
        other => panic!("unexpected: {other:?}"),
    }
    // Within the negative TTL the 404 is served from cache.
    match f.service.get_version(&key).await {
        Err(MirrorError::NotFound) => {}
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(f.upstream.version_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn absent_index_is_fetched_synchronously() {
    let f = fixture().await;
    let index = f.service.get_index(&provider()).await.unwrap();
    assert!(index.versions.contains_key("5.0.0"));
    assert_eq!(f.upstream.index_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_index_serves_immediately_and_refreshes_in_background() {
    let f = fixture().await;
    let key = provider();

    // Plant a stale entry listing only the old version.
    f.index
        .put_index(&key, &versions_doc(&["4.0.0"]), now() - 1_000)
        .await
        .unwrap();
    f.upstream.set_index_doc(versions_doc(&["4.0.0", "5.0.0"]));

    // The stale list is served without waiting on upstream.
    let index = f.service.get_index(&key).await.unwrap();
    assert!(index.versions.contains_key("4.0.0"));
    assert!(!index.versions.contains_key("5.0.0"));

    // Exactly one background refresh lands the new version list.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.upstream.index_calls.load(Ordering::SeqCst), 1);
    let index = f.service.get_index(&key).await.unwrap();
    assert!(index.versions.contains_key("5.0.0"));
    assert_eq!(f.upstream.index_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_index_is_served_when_upstream_is_down() {
    let f = fixture().await;
    let key = provider();
    f.index
        .put_index(&key, &versions_doc(&["4.0.0"]), now() - 1_000)
        .await
        .unwrap();
    f.upstream.set_mode(Mode::Unavailable);

    // The failure is absorbed; the client still gets the stale list.
    let index = f.service.get_index(&key).await.unwrap();
    assert!(index.versions.contains_key("4.0.0"));
}

#[tokio::test]
async fn absent_index_with_upstream_down_surfaces_unavailable() {
    let f = fixture().await;
    f.upstream.set_mode(Mode::Unavailable);
    match f.service.get_index(&provider()).await {
        Err(MirrorError::UpstreamUnavailable(_)) => {}
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn expired_version_entry_is_never_served_without_revalidation() {
    let f = fixture().await;
    let key = version_key("5.0.0");
    let digest = ArtifactDigest::compute(b"old artifact").to_hex();
    f.index
        .put_version(&key, &version_metadata(&digest), now() - 1_000)
        .await
        .unwrap();

    // Revalidation fails: the expired entry must not be the answer.
    f.upstream.set_mode(Mode::Unavailable);
    match f.service.get_version(&key).await {
        Err(MirrorError::UpstreamUnavailable(_)) => {}
        other => panic!("unexpected: {other:?}"),
    }

    // Revalidation succeeds: the refreshed entry is served.
    f.upstream.set_mode(Mode::Ok);
    let doc = f.service.get_version(&key).await.unwrap();
    assert!(doc.archives.contains_key("linux_amd64"));
}

#[tokio::test]
async fn artifact_is_fetched_lazily_verified_and_cached() {
    let f = fixture().await;
    let bytes = Bytes::from_static(b"the provider archive");
    let digest = ArtifactDigest::compute(&bytes);
    f.upstream.set_artifact(bytes.clone());
    f.upstream.set_version_doc(version_metadata(&digest.to_hex()));

    // The version fetch records where the archive lives upstream.
    f.service.get_version(&version_key("5.0.0")).await.unwrap();

    let served = f.service.get_artifact(&digest).await.unwrap();
    assert_eq!(served, bytes);
    assert_eq!(f.upstream.artifact_calls.load(Ordering::SeqCst), 1);
    assert!(f.store.has(&digest).await.unwrap());

    // Second request comes from the store.
    let served = f.service.get_artifact(&digest).await.unwrap();
    assert_eq!(served, bytes);
    assert_eq!(f.upstream.artifact_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn artifact_with_unknown_digest_is_not_found() {
    let f = fixture().await;
    let digest = ArtifactDigest::compute(b"nobody advertised this");
    match f.service.get_artifact(&digest).await {
        Err(MirrorError::NotFound) => {}
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn corrupted_artifact_download_stores_nothing() {
    let f = fixture().await;
    let advertised = ArtifactDigest::compute(b"advertised content");
    f.upstream.set_artifact(Bytes::from_static(b"tampered content"));
    f.upstream
        .set_version_doc(version_metadata(&advertised.to_hex()));
    f.service.get_version(&version_key("5.0.0")).await.unwrap();

    match f.service.get_artifact(&advertised).await {
        Err(MirrorError::ChecksumMismatch { .. }) => {}
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!f.store.has(&advertised).await.unwrap());
    let tampered = ArtifactDigest::compute(b"tampered content");
    assert!(!f.store.has(&tampered).await.unwrap());
}

#[tokio::test]
async fn eviction_protects_artifacts_of_live_versions() {
    let f = fixture().await;
    let bytes = Bytes::from_static(b"live version archive bytes");
    let digest = ArtifactDigest::compute(&bytes);
    f.upstream.set_artifact(bytes.clone());
    f.upstream.set_version_doc(version_metadata(&digest.to_hex()));
    f.service.get_version(&version_key("5.0.0")).await.unwrap();
    f.service.get_artifact(&digest).await.unwrap();

    // Orphan artifact with no referencing version entry.
    let orphan = f.store.put(Bytes::from_static(b"orphaned archive bytes!!")).await.unwrap();

    // A bound of zero forces eviction of everything evictable.
    let stats = f.service.evict(0).await.unwrap();
    assert_eq!(stats.evicted, 1);
    assert!(f.store.has(&digest).await.unwrap());
    assert!(!f.store.has(&orphan).await.unwrap());
}
