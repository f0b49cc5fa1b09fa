//! Best-effort nearest-neighbor lookup over stored error vectors

use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::TriageError;
use crate::stores::{MetadataFilter, SimilarityMatch, VectorStore};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimilarityResult {
  /// Most similar first, at most `top_k` entries
  pub matches: Vec<SimilarityMatch>,
  /// Set when the store could not be queried; `matches` is then empty
  pub degraded: bool,
}

impl SimilarityResult {
  pub fn best_score(&self) -> Option<f32> {
    self.matches.first().map(|m| m.score)
  }

  /// Whether any match reaches `threshold` (inclusive)
  pub fn any_at_or_above(&self, threshold: f32) -> bool {
    self.matches.iter().any(|m| m.score >= threshold)
  }
}

pub struct SimilaritySearch {
  store: Arc<dyn VectorStore>,
}

impl SimilaritySearch {
  pub fn new(store: Arc<dyn VectorStore>) -> Self {
    Self { store }
  }

  /// Top `top_k` neighbors of `vector`. Store failures degrade to an empty result.
  pub async fn nearest(
    &self,
    vector: &[f32],
    top_k: usize,
    filter: Option<&MetadataFilter>,
  ) -> SimilarityResult {
    if top_k == 0 {
      return SimilarityResult::default();
    }

    match self.store.query(vector, top_k, filter.cloned()).await {
      Ok(mut matches) => {
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        matches.truncate(top_k);
        SimilarityResult { matches, degraded: false }
      }
      Err(e) => {
        let error = TriageError::SimilaritySearchFailure { message: e.to_string() };
        tracing::error!("{error}");
        SimilarityResult { matches: Vec::new(), degraded: true }
      }
    }
  }
}
