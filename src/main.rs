use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use storyreel::adapters::{ElevenLabsClient, FalClient};
use storyreel::handlers;
use storyreel::services::{CreditLedger, WorkTracker};
use storyreel::shotstack_client::ShotstackClient;
use storyreel::workflow::Orchestrator;
use storyreel::AppState;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    // Generation adapters and the render vendor are all required: a run
    // cannot partially execute without one of them.
    let fal_api_key = std::env::var("FAL_API_KEY").expect("FAL_API_KEY must be set");
    let elevenlabs_api_key =
        std::env::var("ELEVENLABS_API_KEY").expect("ELEVENLABS_API_KEY must be set");
    let shotstack_api_key =
        std::env::var("SHOTSTACK_API_KEY").expect("SHOTSTACK_API_KEY must be set");

    let fal_client = Arc::new(FalClient::new(fal_api_key));
    let elevenlabs_client = Arc::new(ElevenLabsClient::new(elevenlabs_api_key));
    let mut shotstack_client = ShotstackClient::new(shotstack_api_key);
    if let Ok(base_url) = std::env::var("SHOTSTACK_BASE_URL") {
        // Shotstack's stage environment renders with a watermark; useful
        // for development accounts.
        shotstack_client = shotstack_client.with_base_url(base_url);
    }
    let shotstack_client = Arc::new(shotstack_client);
    tracing::info!("✅ Generation adapters configured (fal, elevenlabs, shotstack)");

    // Ledger and tracker are the bookkeeping spine of every run
    let ledger = Arc::new(CreditLedger::new());
    let tracker = Arc::new(WorkTracker::new(ledger.clone()));

    let orchestrator = Orchestrator::new(
        tracker.clone(),
        ledger.clone(),
        fal_client.clone(),
        fal_client,
        elevenlabs_client,
        shotstack_client,
    );
    tracing::info!("🎬 Orchestrator initialized");

    let shared_state = Arc::new(AppState {
        ledger,
        tracker,
        orchestrator,
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::runs::run_routes())
        .merge(handlers::credits::credit_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state));

    let bind_addr =
        std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind listener");
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.expect("Server error");
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,storyreel=trace,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,storyreel=info,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        // JSON logging for production (easier for log aggregation)
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed()
    } else {
        // Human-readable logging for development
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("🎬 StoryReel starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        }
    );

    Ok(())
}

// API Status endpoint
async fn api_status() -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "image_generation": "fal",
            "video_generation": "fal",
            "voiceover": "elevenlabs",
            "render": "shotstack"
        },
        "endpoints": {
            "status": "/api/status",
            "runs": "/api/runs",
            "credits": "/api/credits/:user_id/balance",
            "estimate": "/api/plans/estimate"
        }
    }))
}
