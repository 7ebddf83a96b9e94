// src/main.rs

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use solace::analysis::HttpEmotionClassifier;
use solace::api::ws::ws_router;
use solace::config::CONFIG;
use solace::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(CONFIG.log_level.clone())),
        )
        .init();

    info!("Starting Solace session core");
    info!("Classifier endpoint: {}", CONFIG.classifier_url);
    info!(
        "Pipeline: decimation 1-in-{}, trend push every {} samples, window {}",
        CONFIG.frame_decimation, CONFIG.trend_push_every, CONFIG.window_capacity
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(CONFIG.sqlite_max_connections)
        .connect(&CONFIG.database_url)
        .await?;
    solace::db::run_migrations(&pool).await?;

    let classifier = Arc::new(
        HttpEmotionClassifier::new().map_err(|e| anyhow::anyhow!("classifier setup: {e}"))?,
    );
    let app_state = Arc::new(AppState::new(pool, classifier));

    let cors = CorsLayer::new()
        .allow_origin(CONFIG.cors_origin.parse::<axum::http::HeaderValue>()?)
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let app = ws_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let bind_address = format!("{}:{}", CONFIG.host, CONFIG.port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Session server listening on ws://{}/ws/session/{{id}}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
