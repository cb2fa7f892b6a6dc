pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::overrides::handlers as overrides;
use crate::ranking::handlers as ranking;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Ranking pipeline
        .route("/api/v1/deals/batch", post(ranking::handle_batch))
        .route("/api/v1/deals/:deal_id/analyze", post(ranking::handle_analyze))
        .route(
            "/api/v1/deals/:deal_id/recompute",
            post(ranking::handle_recompute),
        )
        // Attributes and admin overrides
        .route(
            "/api/v1/deals/:deal_id/attributes",
            get(overrides::handle_get_attributes),
        )
        .route(
            "/api/v1/deals/:deal_id/overrides",
            put(overrides::handle_put_override).delete(overrides::handle_delete_overrides),
        )
        .route(
            "/api/v1/deals/:deal_id/overrides/:attribute_name",
            axum::routing::delete(overrides::handle_delete_override),
        )
        .with_state(state)
}
