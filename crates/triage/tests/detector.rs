mod common;

use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;

use common::{error_record, log_row, DownLogStore, QueryDownVectorStore};
use triage::clustering::{ClusterCache, ClusterPrediction};
use triage::config::{ClusteringConfig, DedupConfig, SimilarityConfig};
use triage::detector::{DecisionReason, DuplicateDetector};
use triage::parser::IssueKey;
use triage::stores::{InMemoryLogStore, InMemoryVectorStore, LogStore, VectorStore};

const QUERY: [f32; 2] = [1.0, 0.0];

fn detector(logs: Arc<dyn LogStore>, vectors: Arc<dyn VectorStore>) -> DuplicateDetector {
  let clustering = ClusteringConfig { n_clusters: 2, refresh_interval_secs: 0, ..Default::default() };
  DuplicateDetector::new(
    logs,
    vectors,
    ClusterCache::new(&clustering),
    SimilarityConfig::default(),
    DedupConfig::default(),
  )
}

/// Unit vector at the given cosine from QUERY
fn at_cosine(cosine: f32) -> Vec<f32> {
  vec![cosine, (1.0 - cosine * cosine).sqrt()]
}

async fn caller_with_recent_activity() -> Result<Arc<InMemoryLogStore>> {
  let logs = Arc::new(InMemoryLogStore::new());
  logs.insert_log(&log_row("key-1", "other.py:1", Duration::minutes(10))).await?;
  Ok(logs)
}

#[tokio::test]
async fn test_no_recent_activity_is_not_duplicate() -> Result<()> {
  let vectors = Arc::new(InMemoryVectorStore::new());
  vectors.upsert(error_record("prior", QUERY.to_vec(), "app.py:42")).await?;

  let decision = detector(Arc::new(InMemoryLogStore::new()), vectors)
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(!decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::NoRecentActivity);
  Ok(())
}

#[tokio::test]
async fn test_exact_issue_within_window_is_duplicate() -> Result<()> {
  let logs = Arc::new(InMemoryLogStore::new());
  logs.insert_log(&log_row("key-1", "app.py:42", Duration::minutes(30))).await?;

  let decision = detector(logs, Arc::new(InMemoryVectorStore::new()))
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::ExactIssueMatch);
  Ok(())
}

#[tokio::test]
async fn test_exact_issue_match_still_lists_prior_errors() -> Result<()> {
  let logs = Arc::new(InMemoryLogStore::new());
  logs.insert_log(&log_row("key-1", "app.py:42", Duration::minutes(30))).await?;
  let vectors = Arc::new(InMemoryVectorStore::new());
  vectors.upsert(error_record("prior", QUERY.to_vec(), "app.py:42")).await?;
  vectors.upsert(error_record("older", at_cosine(0.5), "db.py:7")).await?;

  let decision = detector(logs, vectors)
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::ExactIssueMatch);
  assert!(decision.cluster.is_none());
  assert_eq!(decision.similar.len(), 2);
  assert_eq!(decision.similar[0].id, "prior");
  Ok(())
}

#[tokio::test]
async fn test_exact_issue_from_other_caller_does_not_count() -> Result<()> {
  let logs = Arc::new(InMemoryLogStore::new());
  logs.insert_log(&log_row("key-1", "db.py:7", Duration::minutes(30))).await?;
  logs.insert_log(&log_row("key-2", "app.py:42", Duration::minutes(30))).await?;

  let decision = detector(logs, Arc::new(InMemoryVectorStore::new()))
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(!decision.duplicate);
  assert_ne!(decision.reason, DecisionReason::ExactIssueMatch);
  Ok(())
}

#[tokio::test]
async fn test_neighbor_at_090_is_duplicate() -> Result<()> {
  let vectors = Arc::new(InMemoryVectorStore::new());
  vectors.upsert(error_record("prior", at_cosine(0.90), "db.py:7")).await?;

  let decision = detector(caller_with_recent_activity().await?, vectors)
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::SimilarNeighbor);
  assert!(matches!(decision.cluster, Some(ClusterPrediction::Available(_))));
  assert_eq!(decision.similar.len(), 1);
  assert!((decision.similar[0].score - 0.90).abs() < 1e-4);
  Ok(())
}

#[tokio::test]
async fn test_neighbor_at_080_is_not_duplicate() -> Result<()> {
  let vectors = Arc::new(InMemoryVectorStore::new());
  vectors.upsert(error_record("prior", at_cosine(0.80), "db.py:7")).await?;

  let decision = detector(caller_with_recent_activity().await?, vectors)
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(!decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::NoSimilarNeighbor);
  assert_eq!(decision.similar.len(), 1);
  Ok(())
}

#[tokio::test]
async fn test_only_top_three_neighbors_are_consulted() -> Result<()> {
  let vectors = Arc::new(InMemoryVectorStore::new());
  for (i, cosine) in [0.1, 0.2, 0.3, 0.4, 0.5].iter().enumerate() {
    vectors.upsert(error_record(&format!("e{i}"), at_cosine(*cosine), "db.py:7")).await?;
  }

  let decision = detector(caller_with_recent_activity().await?, vectors)
    .is_duplicate("key-1", None, &QUERY)
    .await;

  assert_eq!(decision.similar.len(), 3);
  assert!(decision.similar.windows(2).all(|pair| pair[0].score >= pair[1].score));
  Ok(())
}

#[tokio::test]
async fn test_empty_vector_store_means_no_cluster_model() -> Result<()> {
  let decision = detector(caller_with_recent_activity().await?, Arc::new(InMemoryVectorStore::new()))
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(!decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::ClusterUnavailable);
  assert_eq!(decision.cluster, Some(ClusterPrediction::Unavailable));
  Ok(())
}

#[tokio::test]
async fn test_wrong_length_vector_is_cluster_error() -> Result<()> {
  let vectors = Arc::new(InMemoryVectorStore::new());
  vectors.upsert(error_record("prior", QUERY.to_vec(), "db.py:7")).await?;

  let decision = detector(caller_with_recent_activity().await?, vectors)
    .is_duplicate("key-1", None, &[1.0, 0.0, 0.0])
    .await;

  assert!(!decision.duplicate);
  assert!(matches!(decision.cluster, Some(ClusterPrediction::Error(_))));
  Ok(())
}

#[tokio::test]
async fn test_log_store_outage_reads_as_no_activity() {
  let decision = detector(Arc::new(DownLogStore), Arc::new(InMemoryVectorStore::new()))
    .is_duplicate("key-1", Some(&IssueKey::new("app.py", 42)), &QUERY)
    .await;

  assert!(!decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::NoRecentActivity);
}

#[tokio::test]
async fn test_similarity_outage_is_not_duplicate() -> Result<()> {
  let inner = InMemoryVectorStore::new();
  inner.upsert(error_record("prior", QUERY.to_vec(), "db.py:7")).await?;

  let decision = detector(caller_with_recent_activity().await?, Arc::new(QueryDownVectorStore(inner)))
    .is_duplicate("key-1", None, &QUERY)
    .await;

  assert!(!decision.duplicate);
  assert_eq!(decision.reason, DecisionReason::SimilarityUnavailable);
  assert!(decision.similar.is_empty());
  Ok(())
}
