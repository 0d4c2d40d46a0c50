//! Vitrine server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitrine_core::config::AppConfig;
use vitrine_mirror::{CacheTtls, MirrorService};
use vitrine_server::{create_router, AppState};
use vitrine_store::ArtifactStore;
use vitrine_upstream::{RegistryClient, UpstreamClient};

/// Vitrine - a caching terraform provider mirror
#[derive(Parser, Debug)]
#[command(name = "vitrined")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "VITRINE_CONFIG",
        default_value = "config/vitrine.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: AppConfig = Figment::new()
        .merge(Toml::file(&args.config))
        .merge(Env::prefixed("VITRINE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let index = vitrine_index::from_path(&config.cache.db_path)
        .await
        .context("failed to open cache index")?;
    let backend = vitrine_store::from_config(&config.storage)
        .await
        .context("failed to initialize artifact storage")?;
    let store = ArtifactStore::new(backend);
    tracing::info!(
        backend = store.backend_name(),
        db = %config.cache.db_path.display(),
        "cache initialized"
    );

    let upstream: Arc<dyn UpstreamClient> = Arc::new(
        RegistryClient::new(config.upstream.clone())
            .context("failed to build upstream client")?,
    );

    let mirror = MirrorService::new(
        index,
        store,
        upstream,
        CacheTtls::from(&config.cache),
        config.server.redirect_base.clone(),
    );

    spawn_eviction_sweep(&mirror, &config);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .context("invalid server.bind address")?;
    let state = AppState::new(mirror, Arc::new(config));
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "vitrine listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

/// Periodically evict unreferenced artifacts when a storage bound is set.
fn spawn_eviction_sweep(mirror: &MirrorService, config: &AppConfig) {
    let Some(max_total_bytes) = config.eviction.max_total_bytes else {
        return;
    };
    let interval = config.eviction.sweep_interval();
    let mirror = mirror.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match mirror.evict(max_total_bytes).await {
                Ok(stats) => {
                    if stats.evicted > 0 {
                        tracing::info!(
                            evicted = stats.evicted,
                            evicted_bytes = stats.evicted_bytes,
                            "eviction sweep evicted artifacts"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(reason = %err, "eviction sweep failed");
                }
            }
        }
    });
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received, draining connections");
}
