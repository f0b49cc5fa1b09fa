//! REST API for the triage service
//!
//! `POST /analyze` runs the analysis pipeline on base64-encoded logs;
//! `GET /health` is a liveness check. Uses axum for routing and schemars for
//! OpenAPI documentation generation.

pub mod handlers;
pub mod routing;
pub mod startup;
pub mod types;
