//! Embedding generation for normalized log text

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::TriageError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability: turn one text into one embedding vector
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingService: Send + Sync {
  async fn embed_text(&self, text: &str, model: &str) -> Result<Vec<f32>, TriageError>;
}

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints
pub struct OpenAiEmbeddingService {
  client: Client,
  endpoint: String,
  dimensions: Option<usize>,
}

impl OpenAiEmbeddingService {
  pub fn new(api_key: &str, api_base: &str) -> Result<Self, TriageError> {
    if api_key.trim().is_empty() {
      return Err(TriageError::config("missing OpenAI API key"));
    }

    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&auth).map_err(|_| TriageError::config("invalid OpenAI API key"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let client = Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .default_headers(headers)
      .build()
      .map_err(|e| TriageError::config(format!("failed to build OpenAI HTTP client: {e}")))?;

    Ok(Self {
      client,
      endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
      dimensions: None,
    })
  }

  /// Ask the provider for shortened vectors (text-embedding-3 models only)
  pub fn with_dimensions(mut self, dimensions: usize) -> Self {
    self.dimensions = Some(dimensions);
    self
  }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddingService {
  async fn embed_text(&self, text: &str, model: &str) -> Result<Vec<f32>, TriageError> {
    let request = EmbeddingRequest { model, input: [text], dimensions: self.dimensions };

    let response = self
      .client
      .post(&self.endpoint)
      .json(&request)
      .send()
      .await
      .map_err(|e| TriageError::embedding(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
      return Err(TriageError::embedding(format!(
        "OpenAI embeddings request failed ({status}): {body}"
      )));
    }

    let parsed: EmbeddingResponse = response
      .json()
      .await
      .map_err(|e| TriageError::embedding(format!("failed to parse embedding response: {e}")))?;

    parsed
      .data
      .into_iter()
      .next()
      .map(|entry| entry.embedding)
      .ok_or_else(|| TriageError::embedding("OpenAI returned no embeddings"))
  }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  input: [&'a str; 1],
  #[serde(skip_serializing_if = "Option::is_none")]
  dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
  embedding: Vec<f32>,
}

/// Produces validated embeddings with the configured model and dimension
pub struct EmbeddingGenerator {
  service: Arc<dyn EmbeddingService>,
  model: String,
  dimensions: usize,
}

impl EmbeddingGenerator {
  pub fn new(service: Arc<dyn EmbeddingService>, config: &EmbeddingConfig) -> Self {
    Self { service, model: config.model.clone(), dimensions: config.dimensions }
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  pub fn dimensions(&self) -> usize {
    self.dimensions
  }

  /// Embed `text`; any provider failure or wrongly-sized vector is an `EmbeddingFailure`
  pub async fn embed(&self, text: &str) -> Result<Vec<f32>, TriageError> {
    let vector = self.service.embed_text(text, &self.model).await.map_err(|e| match e {
      TriageError::EmbeddingFailure { .. } => e,
      other => TriageError::embedding(other.to_string()),
    })?;

    if vector.is_empty() {
      return Err(TriageError::embedding("provider returned an empty vector"));
    }
    if vector.len() != self.dimensions {
      return Err(TriageError::embedding(format!(
        "expected {} dimensions from {}, got {}",
        self.dimensions,
        self.model,
        vector.len()
      )));
    }

    tracing::debug!(model = %self.model, dimensions = vector.len(), "embedded text");
    Ok(vector)
  }
}
