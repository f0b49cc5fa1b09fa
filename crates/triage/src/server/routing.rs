//! Axum router configuration for all endpoints

use axum::{
  http::HeaderValue,
  routing::{get, post},
  Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
  cors::{AllowOrigin, Any, CorsLayer},
  trace::TraceLayer,
};

use crate::pipeline::AnalysisPipeline;
use crate::server::handlers;

/// Create the application router around a shared pipeline
pub fn create_router(pipeline: Arc<AnalysisPipeline>, allowed_origins: &[String]) -> Router {
  Router::new()
    .route("/health", get(handlers::health))
    .route("/analyze", post(handlers::analyze))
    .with_state(pipeline)
    .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors_layer(allowed_origins)))
}

/// CORS restricted to the configured origins
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
  let origins: Vec<HeaderValue> = allowed_origins
    .iter()
    .filter_map(|origin| match HeaderValue::from_str(origin) {
      Ok(value) => Some(value),
      Err(_) => {
        tracing::warn!(origin = %origin, "skipping invalid CORS origin");
        None
      }
    })
    .collect();

  CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
}
