use std::net::SocketAddr;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use analysis_cell::{AnalysisJobRunner, AnalysisState, AnalysisStore, InMemoryAnalysisStore, SupabaseAnalysisStore};
use shared_config::{AppConfig, StoreBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic analysis API server");

    let config = Arc::new(AppConfig::from_env());

    let store: Arc<dyn AnalysisStore> = match config.store_backend {
        StoreBackend::Supabase => Arc::new(SupabaseAnalysisStore::new(&config)),
        StoreBackend::InMemory => {
            info!("Using in-memory analysis store");
            Arc::new(InMemoryAnalysisStore::new())
        }
    };

    // Background jobs share the store with the HTTP handlers
    let runner = Arc::new(AnalysisJobRunner::new(
        store.clone(),
        Duration::from_secs(config.scheduler_interval_seconds.max(1)),
    ));
    let jobs = if config.jobs_enabled {
        let runner = runner.clone();
        Some(tokio::spawn(async move { runner.start().await }))
    } else {
        info!("Background jobs disabled");
        None
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = Arc::new(AnalysisState::new(config.clone(), store));

    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let shutdown_runner = runner.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
            shutdown_runner.shutdown().await;
        })
        .await?;

    if let Some(jobs) = jobs {
        jobs.await?;
    }

    info!("Server stopped");
    Ok(())
}
