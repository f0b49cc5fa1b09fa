//! Error taxonomy for the triage pipeline
//!
//! Mandatory legs (embedding, fix generation) surface these to the caller.
//! Best-effort legs (clustering, similarity search, store writes) log them and
//! fall back to a safe default instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
  #[error("Logs cannot be empty")]
  EmptyLogs,

  #[error("Invalid payload: {message}")]
  InvalidPayload { message: String },

  #[error("Failed to process tokens: {message}")]
  ToolFailure { message: String },

  #[error("Embedding creation failed: {message}")]
  EmbeddingFailure { message: String },

  #[error("No vectors available for clustering")]
  ClusteringUnavailable,

  #[error("Clustering failed: {message}")]
  ClusteringError { message: String },

  #[error("Similarity search failed: {message}")]
  SimilaritySearchFailure { message: String },

  #[error("Failed to record vector: {message}")]
  StoreWriteFailure { message: String },

  #[error("Failed to generate analysis: {message}")]
  GenerationFailure { message: String },

  #[error("Invalid configuration: {message}")]
  Config { message: String },
}

impl TriageError {
  pub fn payload(message: impl Into<String>) -> Self {
    Self::InvalidPayload { message: message.into() }
  }

  pub fn tool(message: impl Into<String>) -> Self {
    Self::ToolFailure { message: message.into() }
  }

  pub fn embedding(message: impl Into<String>) -> Self {
    Self::EmbeddingFailure { message: message.into() }
  }

  pub fn clustering(message: impl Into<String>) -> Self {
    Self::ClusteringError { message: message.into() }
  }

  pub fn generation(message: impl Into<String>) -> Self {
    Self::GenerationFailure { message: message.into() }
  }

  pub fn config(message: impl Into<String>) -> Self {
    Self::Config { message: message.into() }
  }

  /// Whether the failure belongs to a leg the request cannot complete without
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      TriageError::EmptyLogs
        | TriageError::InvalidPayload { .. }
        | TriageError::ToolFailure { .. }
        | TriageError::EmbeddingFailure { .. }
        | TriageError::GenerationFailure { .. }
        | TriageError::Config { .. }
    )
  }
}

/// Failures raised by vector-store and log-store adapters
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
  DimensionMismatch { expected: usize, actual: usize },

  #[error("Store request failed: {message}")]
  Transport { message: String },

  #[error("Database error: {message}")]
  Database { message: String },

  #[error("Malformed store response: {message}")]
  Decode { message: String },
}

impl From<reqwest::Error> for StoreError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      StoreError::Decode { message: err.to_string() }
    } else {
      StoreError::Transport { message: err.to_string() }
    }
  }
}

impl From<sqlx::Error> for StoreError {
  fn from(err: sqlx::Error) -> Self {
    StoreError::Database { message: err.to_string() }
  }
}
