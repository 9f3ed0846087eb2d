use axum::{Router, extract::FromRef, http::HeaderName};
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Generic persistence layer.
pub mod catalog;
pub mod models;
pub mod persistence;
pub mod query;
pub mod repository;
pub mod validation;

// Built-in entities, access policy and request routing.
pub mod auth;
pub mod entities;
pub mod router;
pub mod services;

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;

use routes::public;

// --- Public Re-exports ---

pub use auth::{SessionPrincipal, SessionState};
pub use config::AppConfig;
pub use entities::Repositories;
pub use error::{Error, Result};
pub use persistence::{Persistence, PersistenceState, SqliteEngine};
pub use router::{Dispatch, RequestRouter};
pub use services::ServiceRegistry;

/// AppState
///
/// The single shared container handed to every request: the store, the
/// built-in repositories, the request router, session storage and the loaded
/// configuration.
#[derive(Clone)]
pub struct AppState {
    pub store: PersistenceState,
    pub repos: Repositories,
    pub router: Arc<RequestRouter>,
    pub sessions: SessionState,
    pub config: AppConfig,
}

impl AppState {
    /// Wires the repositories and the request router over one store.
    pub fn new(
        store: PersistenceState,
        services: ServiceRegistry,
        sessions: SessionState,
        config: AppConfig,
    ) -> Self {
        let repos = Repositories::new(store.clone());
        let router = Arc::new(RequestRouter::new(
            Arc::new(services),
            repos.clone(),
            &config,
        ));
        Self {
            store,
            repos,
            router,
            sessions,
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for PersistenceState {
    fn from_ref(app_state: &AppState) -> PersistenceState {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for Repositories {
    fn from_ref(app_state: &AppState) -> Repositories {
        app_state.repos.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Fixed routes first, then every other request goes through the CMS request
/// router. Observability layers wrap the whole stack.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(public::public_routes())
        .fallback(handlers::dispatch)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// Span for one HTTP request, correlated by its `x-request-id`.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
