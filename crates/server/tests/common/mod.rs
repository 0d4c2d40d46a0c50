//! Common test fixtures: a full application wired to a mock upstream
//! registry and temp-backed cache.

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use vitrine_core::config::{
    AppConfig, CacheConfig, EvictionConfig, ServerConfig, StorageConfig, UpstreamConfig,
};
use vitrine_mirror::{CacheTtls, MirrorService};
use vitrine_server::{create_router, AppState};
use vitrine_store::ArtifactStore;
use vitrine_upstream::{RegistryClient, UpstreamClient};

pub struct TestApp {
    pub router: Router,
    pub upstream: MockServer,
    _dir: tempfile::TempDir,
}

/// Build a full application against a mock upstream registry.
pub async fn test_app() -> TestApp {
    let upstream = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();

    let config = AppConfig {
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            redirect_base: "https://mirror.test/".parse().unwrap(),
        },
        upstream: UpstreamConfig {
            scheme: "http".to_string(),
            port: upstream.port(),
            retries: 1,
            backoff_initial_ms: 1,
            backoff_cap_ms: 2,
            ..UpstreamConfig::default()
        },
        cache: CacheConfig {
            db_path: dir.path().join("index.db"),
            ..CacheConfig::default()
        },
        storage: StorageConfig::Filesystem {
            path: dir.path().join("artifacts"),
        },
        eviction: EvictionConfig::default(),
    };

    let index = vitrine_index::from_path(&config.cache.db_path).await.unwrap();
    let backend = vitrine_store::from_config(&config.storage).await.unwrap();
    let store = ArtifactStore::new(backend);
    let client: Arc<dyn UpstreamClient> =
        Arc::new(RegistryClient::new(config.upstream.clone()).unwrap());
    let mirror = MirrorService::new(
        index,
        store,
        client,
        CacheTtls::from(&config.cache),
        config.server.redirect_base.clone(),
    );
    let router = create_router(AppState::new(mirror, Arc::new(config)));

    TestApp {
        router,
        upstream,
        _dir: dir,
    }
}

impl TestApp {
    /// Issue one GET against the application router.
    pub async fn get(&self, path: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(path)
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("infallible service")
    }

    pub async fn get_json(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let response = self.get(path).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Register the standard service discovery document.
    pub async fn mock_discovery(&self) -> httpmock::Mock<'_> {
        self.upstream
            .mock_async(|when, then| {
                when.method(GET).path("/.well-known/terraform.json");
                then.status(200)
                    .json_body(json!({"providers.v1": "/v1/providers/"}));
            })
            .await
    }

    /// Register a versions document for hashicorp/aws.
    pub async fn mock_versions(&self, versions: &[&str]) -> httpmock::Mock<'_> {
        let body = json!({
            "versions": versions
                .iter()
                .map(|v| json!({
                    "version": v,
                    "protocols": ["6.0"],
                    "platforms": [{"os": "linux", "arch": "amd64"}]
                }))
                .collect::<Vec<_>>()
        });
        self.upstream
            .mock_async(move |when, then| {
                when.method(GET).path("/v1/providers/hashicorp/aws/versions");
                then.status(200).json_body(body);
            })
            .await
    }

    /// Register the package document for one version/platform, pointing its
    /// download at `archive_path` on the mock server.
    pub async fn mock_download(
        &self,
        version: &str,
        shasum: &str,
        archive_path: &str,
    ) -> httpmock::Mock<'_> {
        let path = format!("/v1/providers/hashicorp/aws/{version}/download/linux/amd64");
        let body = json!({
            "protocols": ["6.0"],
            "os": "linux",
            "arch": "amd64",
            "filename": format!("terraform-provider-aws_{version}_linux_amd64.zip"),
            "download_url": self.upstream.url(archive_path),
            "shasum": shasum,
            "signing_keys": {"gpg_public_keys": []}
        });
        self.upstream
            .mock_async(move |when, then| {
                when.method(GET).path(path);
                then.status(200).json_body(body);
            })
            .await
    }

    /// Serve archive bytes at `path`.
    pub async fn mock_archive(&self, path: &str, bytes: Vec<u8>) -> httpmock::Mock<'_> {
        let path = path.to_string();
        self.upstream
            .mock_async(move |when, then| {
                when.method(GET).path(path);
                then.status(200).body(bytes);
            })
            .await
    }
}
