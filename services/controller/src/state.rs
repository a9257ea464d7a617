use std::sync::Arc;

use supervisor::ModelRegistry;

pub type SharedState = Arc<AppState>;

/// Built once in `main` and handed to every handler.
pub struct AppState {
    pub registry: ModelRegistry,
}

impl AppState {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }
}
