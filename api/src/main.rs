mod config;
mod constants;
mod domain;
mod error;
mod frames;
mod models;
mod pipeline;
mod routes;
mod sampling;
mod services;
mod storage;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use pipeline::Recognizer;
use services::classifier::{HttpClassifier, ModelSpec};
use services::extractor::HttpLandmarkExtractor;

/// Slack on top of the video limit for multipart framing and other fields
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub recognizer: Recognizer,
    pub max_upload_bytes: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let collaborators = &config.collaborators;
    let extractor = HttpLandmarkExtractor::new(
        &collaborators.landmark_service_url,
        collaborators.timeout,
    )
    .context("Failed to build landmark extractor client")?;

    let (frames, features) = collaborators.input_shape;
    let classifier = HttpClassifier::new(
        &collaborators.classifier_url,
        ModelSpec {
            frames,
            features,
            labels: collaborators.labels.clone(),
        },
        collaborators.timeout,
    )
    .context("Failed to build classifier client")?;

    let recognizer = Recognizer::new(
        config.sampling.clone(),
        config.decode.clone(),
        config.extraction_timeout,
        Arc::new(extractor),
        Arc::new(classifier),
    )
    .context("Classifier does not match sampling config")?;

    tracing::info!(
        frames,
        features,
        labels = collaborators.labels.len(),
        landmark_service = %collaborators.landmark_service_url,
        classifier = %collaborators.classifier_url,
        "Recognizer ready"
    );

    let state = Arc::new(AppState {
        db: pool,
        recognizer,
        max_upload_bytes: config.max_upload_bytes,
    });

    let app = routes::build_routes(&config)
        .layer(DefaultBodyLimit::max(
            config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("Server failed")?;

    tracing::info!("Server stopped");
    Ok(())
}
