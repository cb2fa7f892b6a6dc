use std::sync::Arc;

use crate::config::Config;
use crate::ranking::orchestrator::Orchestrator;
use crate::store::AttributeStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Same store the orchestrator writes to; read directly by the override routes.
    pub store: Arc<dyn AttributeStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: Config,
}
