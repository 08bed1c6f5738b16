use std::sync::Arc;

use short_hits::{
    config,
    http::{self, AppState},
    url_service::url_mapping_service_capsule,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let container = config::init_container().await?;

    let service = container.read(url_mapping_service_capsule);
    let shutdown = CancellationToken::new();
    let app = http::router(AppState {
        service: Arc::clone(&service),
        public_base_url: container.read(config::public_base_url_capsule),
        request_timeout: container.read(config::request_timeout_capsule),
        shutdown: shutdown.clone(),
    });

    let listener = TcpListener::bind(container.read(config::addr_capsule)).await?;
    info!(addr = %listener.local_addr()?, "Started listening on TCP");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Waiting for pending hits to be recorded");
    service.wait_for_pending_hits().await;
    info!("Shut down cleanly");
    Ok(())
}

/// Resolves on the first Ctrl-C so in-flight requests can drain; a second
/// Ctrl-C cancels whatever store calls are still running.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "Failed to listen for Ctrl-C; shutting down");
        shutdown.cancel();
        return;
    }
    info!("Received shutdown signal; draining in-flight requests");

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received second shutdown signal; cancelling in-flight requests");
            shutdown.cancel();
        }
    });
}
