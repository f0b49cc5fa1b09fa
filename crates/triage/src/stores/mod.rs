//! Storage capabilities used by the pipeline
//!
//! The vector store holds error embeddings for similarity search and
//! clustering; the log store holds one row per analysed submission for the
//! recency and exact-match checks. Both are reached only through the traits
//! below so adapters can be swapped without touching the pipeline.

pub mod memory;
pub mod pinecone;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use memory::{InMemoryLogStore, InMemoryVectorStore};
pub use pinecone::PineconeVectorStore;
pub use sqlite::SqliteLogStore;

/// Similarity metric an index is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
  #[default]
  Cosine,
  Euclidean,
  Dotproduct,
}

impl Metric {
  pub fn as_str(&self) -> &'static str {
    match self {
      Metric::Cosine => "cosine",
      Metric::Euclidean => "euclidean",
      Metric::Dotproduct => "dotproduct",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
  pub genre: String,
  pub caller_id: String,
  pub issue: String,
  pub timestamp: String,
}

impl VectorMetadata {
  /// Value of a metadata field by name, for equality filtering
  pub fn field(&self, name: &str) -> Option<&str> {
    match name {
      "genre" => Some(&self.genre),
      "caller_id" => Some(&self.caller_id),
      "issue" => Some(&self.issue),
      "timestamp" => Some(&self.timestamp),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
  pub id: String,
  pub values: Vec<f32>,
  pub metadata: VectorMetadata,
}

/// One nearest-neighbor hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
  pub id: String,
  pub score: f32,
  pub metadata: Option<VectorMetadata>,
}

/// Conjunction of metadata equality conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
  conditions: Vec<(String, String)>,
}

impl MetadataFilter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
    self.conditions.push((field.into(), value.into()));
    self
  }

  pub fn conditions(&self) -> &[(String, String)] {
    &self.conditions
  }

  pub fn matches(&self, metadata: &VectorMetadata) -> bool {
    self.conditions.iter().all(|(field, value)| metadata.field(field) == Some(value.as_str()))
  }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
  /// Create the backing index with this dimension and metric if it is missing
  async fn ensure_index(&self, dimension: usize, metric: Metric) -> Result<(), StoreError>;

  /// Insert or overwrite a record by id
  async fn upsert(&self, record: VectorRecord) -> Result<(), StoreError>;

  /// Closest `top_k` records to `vector`, most similar first
  async fn query(
    &self,
    vector: &[f32],
    top_k: usize,
    filter: Option<MetadataFilter>,
  ) -> Result<Vec<SimilarityMatch>, StoreError>;

  /// Up to `limit` stored records with their values, in store order
  async fn fetch_sample(&self, limit: usize) -> Result<Vec<VectorRecord>, StoreError>;
}

/// One analysed submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRow {
  pub caller_id: String,
  pub issue: String,
  pub repository: String,
  pub timestamp: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogStore: Send + Sync {
  async fn find_recent_logs(
    &self,
    caller_id: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<LogRow>, StoreError>;

  async fn find_exact_issue(
    &self,
    caller_id: &str,
    issue: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<LogRow>, StoreError>;

  async fn insert_log(&self, row: &LogRow) -> Result<(), StoreError>;
}

/// Cosine similarity in [-1, 1]; 0 for empty, zero or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() || a.is_empty() {
    return 0.0;
  }

  let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
  let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
  let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

  if norm_a == 0.0 || norm_b == 0.0 {
    return 0.0;
  }
  (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}
