//! In-process store adapters for local runs and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tokio::sync::RwLock;

use super::{
  cosine_similarity, LogRow, LogStore, Metric, MetadataFilter, SimilarityMatch, VectorRecord,
  VectorStore,
};
use crate::error::StoreError;

#[derive(Default)]
struct VectorIndex {
  dimension: Option<usize>,
  metric: Metric,
  records: Vec<VectorRecord>,
}

impl VectorIndex {
  fn check_dimension(&self, actual: usize) -> Result<(), StoreError> {
    match self.dimension {
      Some(expected) if expected != actual => Err(StoreError::DimensionMismatch { expected, actual }),
      _ => Ok(()),
    }
  }

  fn score(&self, a: &[f32], b: &[f32]) -> f32 {
    match self.metric {
      Metric::Cosine => cosine_similarity(a, b),
      Metric::Dotproduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
      Metric::Euclidean => -a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt(),
    }
  }
}

/// Vector index held in memory; enforces a single dimension across records
#[derive(Default)]
pub struct InMemoryVectorStore {
  index: RwLock<VectorIndex>,
}

impl InMemoryVectorStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn len(&self) -> usize {
    self.index.read().await.records.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  pub async fn get(&self, id: &str) -> Option<VectorRecord> {
    self.index.read().await.records.iter().find(|record| record.id == id).cloned()
  }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
  async fn ensure_index(&self, dimension: usize, metric: Metric) -> Result<(), StoreError> {
    let mut index = self.index.write().await;
    index.check_dimension(dimension)?;
    if index.dimension.is_none() {
      index.dimension = Some(dimension);
      index.metric = metric;
      tracing::info!(dimension, metric = metric.as_str(), "created in-memory vector index");
    }
    Ok(())
  }

  async fn upsert(&self, record: VectorRecord) -> Result<(), StoreError> {
    if record.values.is_empty() {
      return Err(StoreError::DimensionMismatch {
        expected: self.index.read().await.dimension.unwrap_or(0),
        actual: 0,
      });
    }

    let mut index = self.index.write().await;
    index.check_dimension(record.values.len())?;
    index.dimension.get_or_insert(record.values.len());

    match index.records.iter_mut().find(|existing| existing.id == record.id) {
      Some(existing) => *existing = record,
      None => index.records.push(record),
    }
    Ok(())
  }

  async fn query(
    &self,
    vector: &[f32],
    top_k: usize,
    filter: Option<MetadataFilter>,
  ) -> Result<Vec<SimilarityMatch>, StoreError> {
    let index = self.index.read().await;
    if index.records.is_empty() {
      return Ok(Vec::new());
    }
    index.check_dimension(vector.len())?;

    let mut matches: Vec<SimilarityMatch> = index
      .records
      .iter()
      .filter(|record| filter.as_ref().map_or(true, |f| f.matches(&record.metadata)))
      .map(|record| SimilarityMatch {
        id: record.id.clone(),
        score: index.score(vector, &record.values),
        metadata: Some(record.metadata.clone()),
      })
      .collect();

    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    matches.truncate(top_k);
    Ok(matches)
  }

  async fn fetch_sample(&self, limit: usize) -> Result<Vec<VectorRecord>, StoreError> {
    let index = self.index.read().await;
    Ok(index.records.iter().take(limit).cloned().collect())
  }
}

/// Submission log held in memory
#[derive(Default)]
pub struct InMemoryLogStore {
  rows: RwLock<Vec<LogRow>>,
}

impl InMemoryLogStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn rows(&self) -> Vec<LogRow> {
    self.rows.read().await.clone()
  }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
  async fn find_recent_logs(
    &self,
    caller_id: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<LogRow>, StoreError> {
    let rows = self.rows.read().await;
    Ok(rows.iter().filter(|row| row.caller_id == caller_id && row.timestamp >= since).cloned().collect())
  }

  async fn find_exact_issue(
    &self,
    caller_id: &str,
    issue: &str,
    since: DateTime<Utc>,
  ) -> Result<Vec<LogRow>, StoreError> {
    let rows = self.rows.read().await;
    Ok(
      rows
        .iter()
        .filter(|row| row.caller_id == caller_id && row.issue == issue && row.timestamp >= since)
        .cloned()
        .collect(),
    )
  }

  async fn insert_log(&self, row: &LogRow) -> Result<(), StoreError> {
    self.rows.write().await.push(row.clone());
    Ok(())
  }
}
