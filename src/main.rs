use cms_core::{
    AppState,
    auth::MemorySessionStore,
    config::{AppConfig, RunMode},
    create_router,
    persistence::{PersistenceState, SqliteEngine},
    services::ServiceRegistry,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, installs logging, opens the store and serves the CMS.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast)
    dotenv::dotenv().ok();
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    // 2. Logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cms_core=debug,tower_http=info".into());

    match config.run_mode {
        RunMode::Development => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        RunMode::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("CMS starting in {:?} mode", config.run_mode);
    tracing::info!(
        dir_system = %config.dir_system.display(),
        dir_app = %config.dir_app.display(),
        "asset directories"
    );
    if !config.activated {
        tracing::warn!("site is not activated; all routes lead to admin/activate");
    }

    // 3. Store
    let engine = SqliteEngine::connect(&config)
        .await
        .expect("FATAL: Failed to open the store. Check DATABASE_URL.");
    let store = Arc::new(engine) as PersistenceState;

    // 4. Unified state
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(
        store,
        ServiceRegistry::builtin(),
        Arc::new(MemorySessionStore::new()),
        config,
    );

    // 5. Server
    let app = create_router(state);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind the HTTP listener. Check CMS_BIND.");

    tracing::info!("Listening on {bind_addr}");

    axum::serve(listener, app).await.expect("HTTP server failed");
}
