use std::sync::Arc;

use renamer_events::ProgressBus;

use crate::config::ApiConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone: everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The same bus the job runner publishes to.
    pub bus: Arc<ProgressBus>,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(bus: Arc<ProgressBus>, config: ApiConfig) -> Self {
        Self {
            bus,
            config: Arc::new(config),
        }
    }
}
