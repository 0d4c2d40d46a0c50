//! Route configuration.

use crate::handlers;
use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

/// Create the application router.
///
/// The `index.json` route must be registered alongside the `{version}`
/// capture; the router prefers the static segment, so `index.json` never
/// reaches the version handler.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(handlers::healthcheck))
        .route("/artifacts/{digest}", get(handlers::artifact_handler))
        .route(
            "/{hostname}/{namespace}/{provider_type}/index.json",
            get(handlers::index_handler),
        )
        .route(
            "/{hostname}/{namespace}/{provider_type}/{version}",
            get(handlers::version_handler),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        .with_state(state)
}
