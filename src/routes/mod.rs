use std::sync::Arc;

use crate::services::analyze::AnalysisService;

pub mod analyze;
pub mod health;
pub mod providers;
pub mod routes;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AnalysisService>,
}

/// State over the in-memory store, scratch directories and a steady
/// synthetic provider.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use crate::config::AppConfig;
    use crate::db::store::MemoryRouteStore;
    use crate::services::blob::LocalBlobStore;
    use crate::services::provider::testing::SteadyWind;
    use crate::services::provider::ProviderRegistry;

    let scratch = std::env::temp_dir().join(format!("routes-{}", uuid::Uuid::new_v4()));
    let mut config = AppConfig::from_lookup(|_| None);
    config.data_dir = scratch.join("data").display().to_string();

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(SteadyWind::new(5.0, 270.0)));

    AppState {
        service: Arc::new(AnalysisService::new(
            &config,
            Arc::new(MemoryRouteStore::new()),
            Arc::new(LocalBlobStore::new(scratch.join("blobs"))),
            registry,
        )),
    }
}
