use std::sync::Arc;

use anyhow::Context;

use autoforward::api::{ApiState, api_routes, cors_layer};
use autoforward::config::{ForwarderConfig, ServerConfig};
use autoforward::forwarder::Orchestrator;
use autoforward::platform::{BridgeConnector, Connector};
use autoforward::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;

    eprintln!("📨 Autoforward v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/", config.port);
    eprintln!("   Bridge: {}", config.bridge_url);
    eprintln!("   Database: {}\n", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // ── Forwarding core ──────────────────────────────────────────────────
    let connector: Arc<dyn Connector> = Arc::new(BridgeConnector::new(
        config.bridge_url.clone(),
        config.bridge_poll_timeout_secs,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        Arc::clone(&connector),
        ForwarderConfig::default(),
    ));

    // Workers initialise in the background; serving does not wait for them.
    let startup = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            match orchestrator.start_active_rules().await {
                Ok(n) => tracing::info!(count = n, "Active rules started"),
                Err(e) => tracing::error!("Failed to start active rules: {e}"),
            }
        })
    };

    // ── HTTP API ─────────────────────────────────────────────────────────
    let app = api_routes(ApiState {
        store: Arc::clone(&db),
        connector,
        orchestrator: Arc::clone(&orchestrator),
    })
    .layer(cors_layer(&config));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    startup.abort();
    orchestrator.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
