//! Informational debug server.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use pkgmgr_runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct HttpState {
    pub runtime: Arc<Runtime>,
}

pub fn app(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .nest("/packages", api::router())
        .with_state(HttpState { runtime })
}

/// Serve the debug routes on `addr` until `shutdown` is cancelled; `None`
/// when the server is disabled.
pub fn spawn_http_server(
    addr: Option<SocketAddr>,
    runtime: Arc<Runtime>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let addr = addr?;
    let app = app(runtime);
    Some(tokio::spawn(async move {
        if let Err(err) = serve(addr, app, shutdown).await {
            tracing::error!("http server error: {err}");
        }
    }))
}

async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind {addr}: {e}"))?;
    tracing::info!("debug server listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| format!("serve {addr}: {e}"))
}
