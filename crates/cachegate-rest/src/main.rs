use cachegate_core::GatewayConfig;
use cachegate_metadata::{open_store, EntryRepository};
use cachegate_rest::{build_router, telemetry, tokens, AppState, TokenRing};
use cachegate_service::{resolve_budget, CacheService};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;

    if let Err(e) = telemetry::init_tracing(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let Some(password) = config.auth.password.clone().filter(|p| !p.is_empty()) else {
        tracing::error!(
            "No gateway password configured (CACHEGATE_AUTH__PASSWORD), refusing to start"
        );
        return Err("auth.password is not set".into());
    };

    tracing::info!(url = %config.metadata.database_url, "Opening metadata store");
    let pool = open_store(&config.metadata.database_url, config.metadata.max_connections).await?;

    let engine = cachegate_storage::connect(&config.storage, &config.metadata.database_name).await?;

    let budget = resolve_budget(&config.cache, &config.metadata.database_url);
    let service = Arc::new(CacheService::new(
        EntryRepository::new(pool.clone()),
        engine.clone(),
        &config,
        budget,
    ));
    service.start_timers();

    let ring = Arc::new(TokenRing::new());
    let rotation = tokens::spawn_rotation(ring.clone(), config.auth.token_rotation());

    let app = build_router(
        AppState::new(service.clone(), ring, &password),
        config.server.body_limit_mb * 1024 * 1024,
    );

    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    rotation.abort();
    service.shutdown().await;
    if let Err(e) = engine.disconnect().await {
        tracing::warn!(error = %e, "Storage engine did not disconnect cleanly");
    }
    pool.close().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, initiating graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
