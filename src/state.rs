use std::sync::Arc;

use crate::env_config::Config;
use crate::metrics::Metrics;
use crate::pacer::RequestPacer;
use crate::registry::Registry;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub pacer: Arc<RequestPacer>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        pacer: Arc<RequestPacer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            registry,
            pacer,
            metrics,
        }
    }
}
