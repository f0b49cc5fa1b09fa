//! Endpoint handlers

use axum::{
  extract::{Json, State},
  http::StatusCode,
  response::Json as ResponseJson,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::TriageError;
use crate::extract::decode_payload;
use crate::pipeline::{AnalysisPipeline, AnalysisRequest};
use crate::server::types::{AnalyzeRequest, AnalyzeResponse, ApiError, BaseResponse, HealthResponse};

pub const SERVICE_NAME: &str = "build-triage";

type ErrorResponse = (StatusCode, ResponseJson<BaseResponse<()>>);

/// GET /health
pub async fn health() -> ResponseJson<HealthResponse> {
  ResponseJson(HealthResponse { status: "healthy".to_string(), service: SERVICE_NAME.to_string() })
}

/// POST /analyze - Diagnose build logs, skipping the LLM for duplicates
pub async fn analyze(
  State(pipeline): State<Arc<AnalysisPipeline>>,
  Json(request): Json<AnalyzeRequest>,
) -> Result<ResponseJson<BaseResponse<AnalyzeResponse>>, ErrorResponse> {
  let transaction_id = Uuid::new_v4();

  if request.api_key.trim().is_empty() {
    return Err(reject(StatusCode::BAD_REQUEST, "missing_api_key", "API key is required", transaction_id));
  }

  let logs = decode_payload(&request.logs).map_err(|e| {
    let (status, key) = classify(&e);
    reject(status, key, &e.to_string(), transaction_id)
  })?;

  // Undecodable context is dropped rather than failing the request
  let code_context = request.code_context.as_deref().and_then(|encoded| match decode_payload(encoded) {
    Ok(context) => Some(context),
    Err(e) => {
      tracing::warn!(%transaction_id, "ignoring code context: {e}");
      None
    }
  });

  let submission =
    AnalysisRequest { caller_id: request.api_key.trim().to_string(), logs, code_context };

  match pipeline.analyze(submission).await {
    Ok(report) => {
      tracing::info!(
        %transaction_id,
        error_id = %report.error_id,
        duplicate = report.duplicate,
        "analysis complete"
      );
      Ok(ResponseJson(BaseResponse::success(AnalyzeResponse::from(report), transaction_id)))
    }
    Err(e) => {
      tracing::error!(%transaction_id, "analysis failed: {e}");
      let (status, key) = classify(&e);
      Err(reject(status, key, &e.to_string(), transaction_id))
    }
  }
}

fn classify(error: &TriageError) -> (StatusCode, &'static str) {
  match error {
    TriageError::EmptyLogs => (StatusCode::BAD_REQUEST, "empty_logs"),
    TriageError::InvalidPayload { .. } => (StatusCode::BAD_REQUEST, "invalid_logs"),
    TriageError::EmbeddingFailure { .. } => (StatusCode::BAD_GATEWAY, "embedding_failed"),
    TriageError::GenerationFailure { .. } => (StatusCode::BAD_GATEWAY, "generation_failed"),
    _ => (StatusCode::INTERNAL_SERVER_ERROR, "analysis_failed"),
  }
}

fn reject(status: StatusCode, key: &str, message: &str, transaction_id: Uuid) -> ErrorResponse {
  let error = ApiError::new(key, message);
  (status, ResponseJson(BaseResponse::<()>::error(vec![error], transaction_id)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_failures_map_to_status_codes() {
    assert_eq!(classify(&TriageError::EmptyLogs).0, StatusCode::BAD_REQUEST);
    assert_eq!(classify(&TriageError::embedding("down")).0, StatusCode::BAD_GATEWAY);
    assert_eq!(classify(&TriageError::generation("down")).1, "generation_failed");
    assert_eq!(classify(&TriageError::tool("bad encoding")).0, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(classify(&TriageError::payload("invalid base64")), (StatusCode::BAD_REQUEST, "invalid_logs"));
  }
}
