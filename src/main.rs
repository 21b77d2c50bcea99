use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use arena_backend::api::{self, AppState};
use arena_backend::auth;
use arena_backend::config::Config;
use arena_backend::db::Database;
use arena_backend::judge::JudgeClient;
use arena_backend::locks::BattleLocks;
use arena_backend::metrics;

#[tokio::main]
async fn main() {
    let config = Config::load();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    metrics::register_metrics();

    let db = Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    // Bootstrap admin account, insert-if-absent.
    if let Some(password) = &config.admin_password {
        match auth::hash_password(password) {
            Ok(hash) => {
                if let Err(e) = db.ensure_admin("admin", &hash).await {
                    tracing::error!("Failed to seed admin account: {e}");
                }
            }
            Err(e) => tracing::error!("Failed to hash admin password: {e}"),
        }
    }

    if config.jwt_secret.is_none() {
        tracing::warn!("JWT_SECRET is not set: no session can be issued or verified");
    }

    let judge = JudgeClient::from_config(&config).map(Arc::new);
    if judge.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set: all verdicts will use the elo fallback");
    }

    let port = config.port;
    let config = Arc::new(config);

    let state = AppState {
        db,
        config: config.clone(),
        judge,
        locks: BattleLocks::new(),
    };

    // Inject Arc<Config> into request extensions so the session
    // extractors can verify tokens without access to AppState.
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            move |mut req: axum::http::Request<axum::body::Body>, next: axum::middleware::Next| {
                let config = config.clone();
                async move {
                    req.extensions_mut().insert(config);
                    next.run(req).await
                }
            },
        ));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to port {port}: {e}"));

    tracing::info!("Arena backend listening on port {port}");
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
