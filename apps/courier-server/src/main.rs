//! Courier webhook delivery server
//!
//! Serves the event, delivery and subscription API and runs the delivery
//! worker in the same process.

mod config;
mod logging;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::json;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

use config::Config;
use courier_webhooks::{
    webhooks_router, AlertTrigger, DeliveryWorker, Dispatcher, Stores, WebhooksState,
};

#[tokio::main]
async fn main() {
    // Load configuration (fail-fast on invalid values)
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        worker_concurrency = config.worker_concurrency,
        "Starting courier"
    );
    if config.allow_private_urls {
        tracing::warn!(
            target: "security",
            "COURIER_ALLOW_PRIVATE_URLS is enabled; endpoints may target internal hosts"
        );
    }

    let stores = Stores::in_memory();

    let dispatcher = match Dispatcher::new(
        stores.clone(),
        config.dispatcher_config(),
        Arc::new(AlertTrigger::default()),
    ) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("Failed to create dispatcher: {e}");
            std::process::exit(1);
        }
    };

    let worker = Arc::new(DeliveryWorker::new(
        stores.clone(),
        dispatcher,
        config.worker_config(),
    ));
    let worker_task = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .merge(webhooks_router(WebhooksState::new(
            stores,
            config.allow_private_urls,
        )))
        .layer(TraceLayer::new_for_http());

    // Bind and serve
    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };

    info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }

    worker.shutdown();
    if let Err(e) = worker_task.await {
        tracing::error!("Delivery worker task failed: {e}");
    }
    info!("Server shutdown complete");
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
