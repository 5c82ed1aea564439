//! National ID Extractor - Document AI relay for PH National ID uploads.

mod auth;
mod config;
mod docai;
mod error;
mod routes;
mod schema;
mod service;

use std::sync::Arc;

use config::Settings;
use docai::DocumentAiClient;
use routes::AppState;
use service::IdService;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "national_id_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Any configuration problem is fatal before we bind
    let settings = Settings::from_env()?;
    info!("Configuration loaded for project {} ({})", settings.project_id, settings.location);

    // One client for the process lifetime, injected into every handler
    let client = DocumentAiClient::new(&settings)?;
    info!("Document AI client initialized");

    let cors = routes::cors_layer(&[
        settings.dev_client_origin.as_str(),
        settings.prod_client_origin.as_str(),
    ])?;
    info!(
        "CORS origins: {}, {}",
        settings.dev_client_origin, settings.prod_client_origin
    );

    let state = AppState {
        service: IdService::new(Arc::new(client)),
        expose_error_trace: settings.expose_error_trace,
    };
    if settings.expose_error_trace {
        info!("Error traces are included in 500 responses");
    }

    let app = routes::router(state, cors, settings.max_upload_bytes);

    // Run server
    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
