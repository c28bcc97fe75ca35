//! HTTP server lifecycle

use super::{create_router, AppContext};
use crate::error::{Error, Result};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bind the control API listener
///
/// Binding happens before the instance info is built so that a port of 0
/// resolves to the real port advertised in status documents.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))
}

/// Serve the control API until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    ctx: AppContext,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!("Control server listening on http://{}", addr);

    let app = create_router(ctx);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("Control server stopped");
    Ok(())
}
