// Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use triage::config::TriageConfig;
use triage::embeddings::EmbeddingService;
use triage::generation::FixGenerator;
use triage::pipeline::{AnalysisPipeline, Services};
use triage::stores::{
  InMemoryLogStore, InMemoryVectorStore, LogRow, LogStore, MetadataFilter, Metric, SimilarityMatch,
  VectorMetadata, VectorRecord, VectorStore,
};
use triage::{StoreError, TriageError};

pub const DIMENSIONS: usize = 16;

/// Deterministic byte-histogram embedding: equal texts give equal vectors
pub struct HistogramEmbeddings;

#[async_trait]
impl EmbeddingService for HistogramEmbeddings {
  async fn embed_text(&self, text: &str, _model: &str) -> Result<Vec<f32>, TriageError> {
    let mut vector = vec![0.0f32; DIMENSIONS];
    for byte in text.bytes() {
      vector[byte as usize % DIMENSIONS] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1.0);
    Ok(vector.into_iter().map(|v| v / norm).collect())
  }
}

/// Histogram embeddings that also keep every text they were asked to embed
#[derive(Default)]
pub struct RecordingEmbeddings {
  texts: Mutex<Vec<String>>,
}

impl RecordingEmbeddings {
  pub fn texts(&self) -> Vec<String> {
    self.texts.lock().map(|texts| texts.clone()).unwrap_or_default()
  }

  pub fn last_text(&self) -> Option<String> {
    self.texts().pop()
  }
}

#[async_trait]
impl EmbeddingService for RecordingEmbeddings {
  async fn embed_text(&self, text: &str, model: &str) -> Result<Vec<f32>, TriageError> {
    if let Ok(mut texts) = self.texts.lock() {
      texts.push(text.to_string());
    }
    HistogramEmbeddings.embed_text(text, model).await
  }
}

/// Fix generator that counts how often it is asked
#[derive(Default)]
pub struct CountingGenerator {
  pub fixes: AtomicUsize,
  pub replacements: AtomicUsize,
}

impl CountingGenerator {
  pub fn fix_calls(&self) -> usize {
    self.fixes.load(Ordering::SeqCst)
  }

  pub fn replacement_calls(&self) -> usize {
    self.replacements.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl FixGenerator for CountingGenerator {
  async fn generate_fix(&self, _content: &str) -> Result<String, TriageError> {
    self.fixes.fetch_add(1, Ordering::SeqCst);
    Ok("Guard the dictionary lookup".to_string())
  }

  async fn generate_replacement_code(&self, _content: &str) -> Result<String, TriageError> {
    self.replacements.fetch_add(1, Ordering::SeqCst);
    Ok("return data.get('x')".to_string())
  }
}

fn unreachable() -> StoreError {
  StoreError::Transport { message: "connection refused".to_string() }
}

/// Vector store whose every call fails
pub struct DownVectorStore;

#[async_trait]
impl VectorStore for DownVectorStore {
  async fn ensure_index(&self, _: usize, _: Metric) -> Result<(), StoreError> {
    Err(unreachable())
  }

  async fn upsert(&self, _: VectorRecord) -> Result<(), StoreError> {
    Err(unreachable())
  }

  async fn query(
    &self,
    _: &[f32],
    _: usize,
    _: Option<MetadataFilter>,
  ) -> Result<Vec<SimilarityMatch>, StoreError> {
    Err(unreachable())
  }

  async fn fetch_sample(&self, _: usize) -> Result<Vec<VectorRecord>, StoreError> {
    Err(unreachable())
  }
}

/// In-memory vector store whose similarity queries fail
pub struct QueryDownVectorStore(pub InMemoryVectorStore);

#[async_trait]
impl VectorStore for QueryDownVectorStore {
  async fn ensure_index(&self, dimension: usize, metric: Metric) -> Result<(), StoreError> {
    self.0.ensure_index(dimension, metric).await
  }

  async fn upsert(&self, record: VectorRecord) -> Result<(), StoreError> {
    self.0.upsert(record).await
  }

  async fn query(
    &self,
    _: &[f32],
    _: usize,
    _: Option<MetadataFilter>,
  ) -> Result<Vec<SimilarityMatch>, StoreError> {
    Err(unreachable())
  }

  async fn fetch_sample(&self, limit: usize) -> Result<Vec<VectorRecord>, StoreError> {
    self.0.fetch_sample(limit).await
  }
}

/// Log store whose every call fails
pub struct DownLogStore;

#[async_trait]
impl LogStore for DownLogStore {
  async fn find_recent_logs(&self, _: &str, _: DateTime<Utc>) -> Result<Vec<LogRow>, StoreError> {
    Err(unreachable())
  }

  async fn find_exact_issue(
    &self,
    _: &str,
    _: &str,
    _: DateTime<Utc>,
  ) -> Result<Vec<LogRow>, StoreError> {
    Err(unreachable())
  }

  async fn insert_log(&self, _: &LogRow) -> Result<(), StoreError> {
    Err(unreachable())
  }
}

pub fn test_config() -> TriageConfig {
  let mut config = TriageConfig::default();
  config.embedding.dimensions = DIMENSIONS;
  config.clustering.n_clusters = 2;
  config.clustering.n_init = 2;
  config
}

pub fn error_record(id: &str, values: Vec<f32>, issue: &str) -> VectorRecord {
  VectorRecord {
    id: id.to_string(),
    values,
    metadata: VectorMetadata {
      genre: "errors".to_string(),
      caller_id: "key-1".to_string(),
      issue: issue.to_string(),
      timestamp: Utc::now().to_rfc3339(),
    },
  }
}

pub fn log_row(caller_id: &str, issue: &str, age: chrono::Duration) -> LogRow {
  LogRow {
    caller_id: caller_id.to_string(),
    issue: issue.to_string(),
    repository: "acme/api".to_string(),
    timestamp: Utc::now() - age,
  }
}

pub struct Harness {
  pub pipeline: Arc<AnalysisPipeline>,
  pub embeddings: Arc<RecordingEmbeddings>,
  pub vectors: Arc<InMemoryVectorStore>,
  pub logs: Arc<InMemoryLogStore>,
  pub generator: Arc<CountingGenerator>,
}

/// Pipeline wired to in-memory stores, histogram embeddings and a counting generator
pub fn harness() -> Harness {
  harness_with(test_config())
}

pub fn harness_with(config: TriageConfig) -> Harness {
  let embeddings = Arc::new(RecordingEmbeddings::default());
  let vectors = Arc::new(InMemoryVectorStore::new());
  let logs = Arc::new(InMemoryLogStore::new());
  let generator = Arc::new(CountingGenerator::default());

  let services = Services {
    embeddings: embeddings.clone(),
    vectors: vectors.clone(),
    logs: logs.clone(),
    generator: generator.clone(),
  };
  let pipeline = Arc::new(AnalysisPipeline::new(&config, services).expect("valid test config"));

  Harness { pipeline, embeddings, vectors, logs, generator }
}
