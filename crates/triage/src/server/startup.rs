//! REST server startup

use anyhow::Result;
use axum::serve;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;

use crate::pipeline::AnalysisPipeline;
use crate::server::routing::create_router;

/// Bind `addr` and serve until Ctrl-C
pub async fn start_server(
  addr: SocketAddr,
  pipeline: Arc<AnalysisPipeline>,
  allowed_origins: &[String],
) -> Result<()> {
  tracing::info!("Starting build triage server on {addr}");

  let app = create_router(pipeline, allowed_origins);
  let listener = TcpListener::bind(addr).await?;
  tracing::info!("Server listening on {addr}");

  serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {e}"))?;

  tracing::info!("Server shutdown gracefully");
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("failed to listen for shutdown signal: {e}");
  }
}
