//! Vector store writes for analysed errors

use std::sync::Arc;

use crate::error::{StoreError, TriageError};
use crate::stores::{Metric, VectorMetadata, VectorRecord, VectorStore};

pub struct VectorStoreWriter {
  store: Arc<dyn VectorStore>,
  metric: Metric,
}

impl VectorStoreWriter {
  pub fn new(store: Arc<dyn VectorStore>, metric: Metric) -> Self {
    Self { store, metric }
  }

  /// Ensure the index exists, then upsert. Failures are logged and reported as `false`.
  pub async fn record(&self, id: &str, vector: &[f32], metadata: VectorMetadata) -> bool {
    match self.try_record(id, vector, metadata).await {
      Ok(()) => {
        tracing::info!(id, dimension = vector.len(), "recorded error vector");
        true
      }
      Err(e) => {
        tracing::error!(id, "{e}");
        false
      }
    }
  }

  async fn try_record(
    &self,
    id: &str,
    vector: &[f32],
    metadata: VectorMetadata,
  ) -> Result<(), TriageError> {
    let write_failure = |e: StoreError| TriageError::StoreWriteFailure { message: e.to_string() };

    self.store.ensure_index(vector.len(), self.metric).await.map_err(write_failure)?;
    let record = VectorRecord { id: id.to_string(), values: vector.to_vec(), metadata };
    self.store.upsert(record).await.map_err(write_failure)
  }
}
