use axum::{extract::State, routing::get, Json, Router};
use event_bus::{EventBus, InMemoryBus, NatsBus};
use event_consumer::{PgDeadLetterQueue, PgGuard};
use onboarding_rs::config::{BusKind, Config};
use onboarding_rs::consumer_tasks;
use onboarding_rs::store::PgChecklistStore;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!("Configuration loaded: {:?}", config.bus_kind);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Database connection established");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Database migrations completed");

    let store = Arc::new(PgChecklistStore::new(pool.clone()));

    // This module is a pure projection: it consumes but never publishes, so
    // there is no outbox relay here.
    let bus: Option<Arc<dyn EventBus>> = match config.bus_kind {
        BusKind::Nats => {
            let nats_url = config.nats_url.as_ref().expect("NATS_URL required for NATS bus");
            tracing::info!("Connecting to NATS at {}", nats_url);
            let nats_client = async_nats::connect(nats_url)
                .await
                .expect("Failed to connect to NATS");
            Some(Arc::new(NatsBus::new(nats_client)))
        }
        BusKind::InMemory => {
            tracing::info!("Using in-memory event bus");
            Some(Arc::new(InMemoryBus::new()))
        }
        BusKind::Disabled => {
            tracing::warn!("Event bus disabled; running without consumers");
            None
        }
    };

    if let Some(bus) = bus {
        consumer_tasks::spawn_consumers(
            bus,
            store,
            Arc::new(PgGuard::new(pool.clone(), consumer_tasks::PROCESSOR)),
            Arc::new(PgDeadLetterQueue::new(pool.clone())),
        );
        tracing::info!("Event consumers started");
    }

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8089".to_string())
        .parse()
        .expect("PORT must be a valid u16");

    let app = Router::new()
        .route("/api/health", get(health))
        .with_state(pool.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Onboarding module listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}

async fn health(State(_pool): State<sqlx::PgPool>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "onboarding",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
