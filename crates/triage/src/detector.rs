//! Duplicate detection
//!
//! Checks run cheapest first and stop at the first conclusive one:
//! caller recency, exact issue match, cluster availability, then nearest
//! neighbor similarity. The detector only reads; recording the submission is
//! the pipeline's job.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::clustering::{ClusterCache, ClusterPrediction};
use crate::config::{DedupConfig, SimilarityConfig};
use crate::error::StoreError;
use crate::parser::IssueKey;
use crate::similarity::{SimilarityResult, SimilaritySearch};
use crate::stores::{LogRow, LogStore, MetadataFilter, SimilarityMatch, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
  NoRecentActivity,
  ExactIssueMatch,
  ClusterUnavailable,
  SimilarNeighbor,
  NoSimilarNeighbor,
  SimilarityUnavailable,
}

impl DecisionReason {
  pub fn as_str(&self) -> &'static str {
    match self {
      DecisionReason::NoRecentActivity => "no_recent_activity",
      DecisionReason::ExactIssueMatch => "exact_issue_match",
      DecisionReason::ClusterUnavailable => "cluster_unavailable",
      DecisionReason::SimilarNeighbor => "similar_neighbor",
      DecisionReason::NoSimilarNeighbor => "no_similar_neighbor",
      DecisionReason::SimilarityUnavailable => "similarity_unavailable",
    }
  }
}

impl fmt::Display for DecisionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct DuplicateDecision {
  pub duplicate: bool,
  pub reason: DecisionReason,
  /// Cluster prediction, when the check got that far
  pub cluster: Option<ClusterPrediction>,
  /// Neighbors consulted, most similar first
  pub similar: Vec<SimilarityMatch>,
}

impl DuplicateDecision {
  fn early(duplicate: bool, reason: DecisionReason) -> Self {
    Self { duplicate, reason, cluster: None, similar: Vec::new() }
  }
}

pub struct DuplicateDetector {
  logs: Arc<dyn LogStore>,
  vectors: Arc<dyn VectorStore>,
  search: SimilaritySearch,
  clusters: ClusterCache,
  similarity: SimilarityConfig,
  dedup: DedupConfig,
}

impl DuplicateDetector {
  pub fn new(
    logs: Arc<dyn LogStore>,
    vectors: Arc<dyn VectorStore>,
    clusters: ClusterCache,
    similarity: SimilarityConfig,
    dedup: DedupConfig,
  ) -> Self {
    let search = SimilaritySearch::new(vectors.clone());
    Self { logs, vectors, search, clusters, similarity, dedup }
  }

  pub async fn is_duplicate(
    &self,
    caller_id: &str,
    issue: Option<&IssueKey>,
    vector: &[f32],
  ) -> DuplicateDecision {
    let now = Utc::now();

    let recent_since = window_start(now, self.dedup.recency_window_secs);
    let recent = self.read_logs("recent", self.logs.find_recent_logs(caller_id, recent_since).await);
    if recent.is_empty() {
      tracing::debug!(caller_id, "no recent submissions; not a duplicate");
      return DuplicateDecision::early(false, DecisionReason::NoRecentActivity);
    }

    if let Some(issue) = issue {
      let exact_since = window_start(now, self.dedup.exact_match_window_secs);
      let issue = issue.to_string();
      let exact =
        self.read_logs("exact", self.logs.find_exact_issue(caller_id, &issue, exact_since).await);
      if !exact.is_empty() {
        tracing::info!(caller_id, issue = %issue, "exact issue seen within window");
        // Neighbors are looked up for display only; the decision is already made
        let prior = self.neighbors(vector).await;
        return DuplicateDecision {
          duplicate: true,
          reason: DecisionReason::ExactIssueMatch,
          cluster: None,
          similar: prior.matches,
        };
      }
    }

    let cluster = self.clusters.predict(self.vectors.as_ref(), vector).await;
    match &cluster {
      ClusterPrediction::Available(label) => tracing::debug!(label, "predicted cluster"),
      ClusterPrediction::Unavailable => tracing::info!("no cluster model available; not a duplicate"),
      ClusterPrediction::Error(cause) => tracing::warn!("cluster prediction failed: {cause}"),
    }
    if cluster.label().is_none() {
      return DuplicateDecision {
        duplicate: false,
        reason: DecisionReason::ClusterUnavailable,
        cluster: Some(cluster),
        similar: Vec::new(),
      };
    }

    let result = self.neighbors(vector).await;

    let (duplicate, reason) = if result.any_at_or_above(self.similarity.threshold) {
      (true, DecisionReason::SimilarNeighbor)
    } else if result.degraded {
      (false, DecisionReason::SimilarityUnavailable)
    } else {
      (false, DecisionReason::NoSimilarNeighbor)
    };

    tracing::info!(
      caller_id,
      duplicate,
      reason = %reason,
      best_score = result.best_score().unwrap_or(0.0),
      "duplicate check complete"
    );
    DuplicateDecision { duplicate, reason, cluster: Some(cluster), similar: result.matches }
  }

  async fn neighbors(&self, vector: &[f32]) -> SimilarityResult {
    let filter = MetadataFilter::new().eq("genre", self.similarity.genre.clone());
    self.search.nearest(vector, self.similarity.top_k, Some(&filter)).await
  }

  fn read_logs(
    &self,
    lookup: &str,
    rows: Result<Vec<LogRow>, StoreError>,
  ) -> Vec<LogRow> {
    rows.unwrap_or_else(|e| {
      tracing::error!(lookup, "log store read failed, treating as no rows: {e}");
      Vec::new()
    })
  }
}

/// Start of a look-back window; windows reaching past the earliest
/// representable instant cover all of history
fn window_start(now: DateTime<Utc>, window_secs: i64) -> DateTime<Utc> {
  TimeDelta::try_seconds(window_secs)
    .and_then(|window| now.checked_sub_signed(window))
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
