//! REST API types with schemars annotations for OpenAPI generation

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::AnalysisReport;
use crate::stores::SimilarityMatch;

// Base Response Structure
// ======================

/// Envelope shared by every JSON endpoint except `/health`
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct BaseResponse<T> {
  pub versioning: VersionInfo,

  /// Transaction ID for logging correlation
  pub transaction_id: Uuid,

  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub errors: Vec<ApiError>,

  #[serde(flatten)]
  pub data: T,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct VersionInfo {
  pub latest: String,
  pub requested: String,
  pub resolved: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ApiError {
  /// Error key, unique to the error source
  pub key: String,

  /// Human readable message, with the underlying cause appended
  pub message: String,
}

impl<T> BaseResponse<T> {
  pub fn success(data: T, transaction_id: Uuid) -> Self {
    Self { versioning: VersionInfo::current(), transaction_id, errors: Vec::new(), data }
  }

  pub fn error(errors: Vec<ApiError>, transaction_id: Uuid) -> BaseResponse<()> {
    BaseResponse { versioning: VersionInfo::current(), transaction_id, errors, data: () }
  }
}

impl VersionInfo {
  fn current() -> Self {
    let version = env!("CARGO_PKG_VERSION");
    Self { latest: version.to_string(), requested: version.to_string(), resolved: version.to_string() }
  }
}

impl ApiError {
  pub fn new(key: &str, message: &str) -> Self {
    Self { key: key.to_string(), message: message.to_string() }
  }
}

// Health
// ======

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
  pub status: String,
  pub service: String,
}

// Analyze
// =======

/// Request for /analyze
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeRequest {
  /// Caller identity; used to scope duplicate detection
  pub api_key: String,

  /// Base64-encoded build logs
  pub logs: String,

  /// Base64-encoded repository code context
  #[serde(default)]
  pub code_context: Option<String>,
}

/// Response for /analyze
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AnalyzeResponse {
  pub status: String,
  pub error_id: String,
  pub duplicate: bool,
  pub reason: String,

  /// Diagnosis; absent for duplicates
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub analysis: Option<String>,

  /// Drop-in replacement code; absent for duplicates
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub new_code: Option<String>,

  pub old_code: String,
  pub file_name: String,

  /// Earlier errors this one resembles
  pub similar: Vec<SimilarError>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SimilarError {
  pub id: String,
  pub score: f32,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub issue: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub timestamp: Option<String>,
}

impl From<SimilarityMatch> for SimilarError {
  fn from(m: SimilarityMatch) -> Self {
    let (issue, timestamp) = match m.metadata {
      Some(metadata) => (Some(metadata.issue), Some(metadata.timestamp)),
      None => (None, None),
    };
    Self { id: m.id, score: m.score, issue, timestamp }
  }
}

impl From<AnalysisReport> for AnalyzeResponse {
  fn from(report: AnalysisReport) -> Self {
    Self {
      status: "success".to_string(),
      error_id: report.error_id,
      duplicate: report.duplicate,
      reason: report.reason.to_string(),
      analysis: report.analysis,
      new_code: report.new_code,
      old_code: report.old_code,
      file_name: report.file_name,
      similar: report.similar.into_iter().map(SimilarError::from).collect(),
    }
  }
}
