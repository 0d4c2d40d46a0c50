//! Application state shared across handlers.

use std::sync::Arc;
use vitrine_core::config::AppConfig;
use vitrine_mirror::MirrorService;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub mirror: MirrorService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(mirror: MirrorService, config: Arc<AppConfig>) -> Self {
        Self { mirror, config }
    }
}
