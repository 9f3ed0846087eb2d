use crate::AppState;
use axum::{Router, routing::get};

/// Public Router Module
///
/// Endpoints answered without consulting the request router or the session.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness check for load balancers; never touches the store.
        .route("/health", get(|| async { "ok" }))
}
