mod common;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::harness;
use triage::server::routing::create_router;

const LOGS: &str = "File \"app.py\", line 42, in handler\nKeyError: 'x'";

fn app() -> (Router, common::Harness) {
  let h = harness();
  let origins = vec!["http://localhost:3000".to_string()];
  (create_router(h.pipeline.clone(), &origins), h)
}

fn analyze_request(body: Value) -> Request<Body> {
  Request::builder()
    .method(Method::POST)
    .uri("/analyze")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

async fn json_body(response: axum::response::Response) -> Result<Value> {
  let bytes = to_bytes(response.into_body(), usize::MAX).await?;
  Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_health() -> Result<()> {
  let (app, _) = app();
  let response = app.oneshot(Request::builder().uri("/health").body(Body::empty())?).await?;

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(json_body(response).await?, json!({ "status": "healthy", "service": "build-triage" }));
  Ok(())
}

#[tokio::test]
async fn test_analyze_then_duplicate() -> Result<()> {
  let (app, h) = app();
  let body = json!({ "api_key": "key-1", "logs": STANDARD.encode(LOGS) });

  let response = app.clone().oneshot(analyze_request(body.clone())).await?;
  assert_eq!(response.status(), StatusCode::OK);
  let first = json_body(response).await?;
  assert_eq!(first["status"], "success");
  assert_eq!(first["duplicate"], false);
  assert_eq!(first["analysis"], "Guard the dictionary lookup");
  assert_eq!(first["new_code"], "return data.get('x')");
  assert_eq!(first["file_name"], "app.py");
  assert!(first["transaction_id"].is_string());

  let response = app.oneshot(analyze_request(body)).await?;
  let second = json_body(response).await?;
  assert_eq!(second["duplicate"], true);
  assert_eq!(second["reason"], "exact_issue_match");
  assert!(second.get("analysis").is_none());
  assert_eq!(h.generator.fix_calls(), 1);
  Ok(())
}

#[tokio::test]
async fn test_code_context_supplies_old_code() -> Result<()> {
  let (app, _) = app();
  let context = "===BEGIN_FILE: ctx_app_0===\nFILE: src/app.py, LINE: 42\nreturn data['x']\n===END_FILE===";
  let body = json!({
    "api_key": "key-1",
    "logs": STANDARD.encode(LOGS),
    "code_context": STANDARD.encode(context),
  });

  let response = app.oneshot(analyze_request(body)).await?;
  let report = json_body(response).await?;
  assert_eq!(report["old_code"], "return data['x']");
  assert_eq!(report["file_name"], "app.py");
  Ok(())
}

#[tokio::test]
async fn test_invalid_base64_is_bad_request() -> Result<()> {
  let (app, h) = app();
  let response = app.oneshot(analyze_request(json!({ "api_key": "key-1", "logs": "%%%" }))).await?;

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let body = json_body(response).await?;
  assert_eq!(body["errors"][0]["key"], "invalid_logs");
  let message = body["errors"][0]["message"].as_str().unwrap_or_default();
  assert!(message.starts_with("Invalid payload: invalid base64"), "{message}");
  assert_eq!(h.generator.fix_calls(), 0);
  Ok(())
}

#[tokio::test]
async fn test_empty_logs_are_bad_request() -> Result<()> {
  let (app, _) = app();
  let body = json!({ "api_key": "key-1", "logs": STANDARD.encode("  \n") });
  let response = app.oneshot(analyze_request(body)).await?;

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let body = json_body(response).await?;
  assert_eq!(body["errors"][0]["key"], "empty_logs");
  assert_eq!(body["errors"][0]["message"], "Logs cannot be empty");
  Ok(())
}

#[tokio::test]
async fn test_missing_api_key_is_bad_request() -> Result<()> {
  let (app, _) = app();
  let body = json!({ "api_key": " ", "logs": STANDARD.encode(LOGS) });
  let response = app.oneshot(analyze_request(body)).await?;

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  Ok(())
}

#[tokio::test]
async fn test_cors_allows_configured_origin_only() -> Result<()> {
  let (app, _) = app();
  let preflight = |origin: &str| {
    Request::builder()
      .method(Method::OPTIONS)
      .uri("/analyze")
      .header(header::ORIGIN, origin)
      .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
      .body(Body::empty())
      .unwrap()
  };

  let allowed = app.clone().oneshot(preflight("http://localhost:3000")).await?;
  assert_eq!(
    allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).and_then(|v| v.to_str().ok()),
    Some("http://localhost:3000")
  );

  let denied = app.oneshot(preflight("https://evil.example")).await?;
  assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
  Ok(())
}
