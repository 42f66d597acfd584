use toolmux::{
    load_backends, router, AppState, Config, HybridSearch, OnnxBackend, RmcpConnector,
    ToolAggregator,
};

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolmux=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting toolmux gateway");

    // Load configuration
    let config = Config::from_env()?;
    let shutdown_timeout = config.shutdown_timeout_secs;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let backends = load_backends(&config.mcp_config_path)?;

    // Set up Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    // Connect the fleet before serving so the first /tools is complete
    let start = std::time::Instant::now();
    let aggregator = Arc::new(
        ToolAggregator::new(Arc::new(RmcpConnector::new()))
            .with_connect_timeout(config.connect_timeout())
            .with_close_timeout(config.close_timeout()),
    );
    let stats = aggregator.initialize(backends).await;
    tracing::info!(
        connected = stats.connected,
        failed = stats.failed,
        tools = aggregator.catalog().len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Backends initialized",
    );

    let search = Arc::new(HybridSearch::new(
        config.search_config(),
        Arc::new(OnnxBackend),
        config.embedding_config(),
    ));

    // Model load can take a while; /search answers 503 until it is done
    {
        let search = Arc::clone(&search);
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            search.initialize(&aggregator.backend_names()).await;
            search.index_tools(&aggregator.get_all_tools()).await;
        });
    }

    let state = Arc::new(AppState::new(config, Arc::clone(&aggregator), search));

    // Build router
    let app = router(state)
        // Metrics endpoint
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    // Create TCP listener
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Server listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    aggregator.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
/// After signal, allows `timeout_secs` for in-flight requests to complete.
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }

    tracing::info!(timeout_secs, "Draining connections...");
    tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
}
