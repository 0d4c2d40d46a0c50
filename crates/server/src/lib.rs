//! HTTP boundary for the vitrine provider mirror.
//!
//! Decodes provider mirror protocol requests, calls the mirror service, and
//! maps its terminal error kinds to stable response codes. Everything with
//! caching or upstream behavior lives below this layer.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
