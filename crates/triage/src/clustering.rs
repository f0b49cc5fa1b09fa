//! K-means partitioning of stored error embeddings
//!
//! The model is refitted from a fresh store sample rather than updated
//! incrementally. `ClusterCache` keeps the last fit around for a configured
//! interval so a burst of requests does not refit on every duplicate check.

use kmeans::{EuclideanDistance, KMeansConfig};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::config::ClusteringConfig;
use crate::error::TriageError;
use crate::stores::{VectorRecord, VectorStore};

/// Outcome of assigning a vector to a cluster
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterPrediction {
  Available(usize),
  /// No model could be fitted (empty store)
  Unavailable,
  Error(String),
}

impl ClusterPrediction {
  pub fn label(&self) -> Option<usize> {
    match self {
      ClusterPrediction::Available(label) => Some(*label),
      _ => None,
    }
  }
}

/// Fitted centroids
#[derive(Debug, Clone)]
pub struct ClusterModel {
  centroids: Array2<f32>,
  inertia: f32,
}

impl ClusterModel {
  pub fn n_clusters(&self) -> usize {
    self.centroids.nrows()
  }

  pub fn dimension(&self) -> usize {
    self.centroids.ncols()
  }

  /// Total distance from training rows to their centroids, as reported by the fit
  pub fn inertia(&self) -> f32 {
    self.inertia
  }

  pub fn centroids(&self) -> ArrayView2<'_, f32> {
    self.centroids.view()
  }

  /// Label of the nearest centroid for a single vector
  pub fn predict(&self, vector: &[f32]) -> Result<usize, TriageError> {
    let row = ArrayView2::from_shape((1, vector.len()), vector)
      .map_err(|e| TriageError::clustering(e.to_string()))?;
    if row.ncols() != self.dimension() {
      return Err(TriageError::clustering(format!(
        "vector has {} dimensions, model expects {}",
        row.ncols(),
        self.dimension()
      )));
    }
    Ok(nearest_centroid(&self.centroids, row.row(0)).0)
  }
}

/// Record id to cluster label, plus the model that produced it
#[derive(Debug, Clone, Default)]
pub struct ClusterAssignment {
  labels: HashMap<String, usize>,
  model: Option<ClusterModel>,
}

impl ClusterAssignment {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.model.is_none()
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn label_of(&self, id: &str) -> Option<usize> {
    self.labels.get(id).copied()
  }

  pub fn model(&self) -> Option<&ClusterModel> {
    self.model.as_ref()
  }
}

// SIMD lane width for the k-means engine; rows are padded to a multiple of it
const LANES: usize = 8;

/// Seeded k-means: k-means++ seeding, Lloyd iterations, best of `n_init` restarts
#[derive(Debug, Clone)]
pub struct KMeans {
  n_clusters: usize,
  n_init: usize,
  max_iterations: usize,
  seed: u64,
}

impl KMeans {
  pub fn new(n_clusters: usize, seed: u64) -> Self {
    Self { n_clusters, n_init: 10, max_iterations: 300, seed }
  }

  pub fn from_config(config: &ClusteringConfig) -> Self {
    Self {
      n_clusters: config.n_clusters,
      n_init: config.n_init.max(1),
      max_iterations: config.max_iterations.max(1),
      seed: config.random_seed,
    }
  }

  pub fn with_n_init(mut self, n_init: usize) -> Self {
    self.n_init = n_init.max(1);
    self
  }

  pub fn n_clusters(&self) -> usize {
    self.n_clusters
  }

  /// Fit centroids to `data`; `k` is clamped to the number of distinct rows
  pub fn train(&self, data: ArrayView2<f32>) -> Result<ClusterModel, TriageError> {
    if data.nrows() == 0 {
      return Err(TriageError::ClusteringUnavailable);
    }
    if data.ncols() == 0 {
      return Err(TriageError::clustering("vectors have zero dimensions"));
    }
    if data.iter().any(|value| !value.is_finite()) {
      return Err(TriageError::clustering("vectors contain non-finite values"));
    }
    if self.n_clusters == 0 {
      return Err(TriageError::clustering("n_clusters must be positive"));
    }

    // k-means++ seeding draws each new centroid from rows at nonzero distance
    let k = self.n_clusters.min(distinct_rows(data));
    let (n, d) = data.dim();
    let samples: Vec<f32> = data.iter().copied().collect();
    let engine: kmeans::KMeans<f32, LANES, _> = kmeans::KMeans::new(&samples, n, d, EuclideanDistance);

    let mut best: Option<ClusterModel> = None;
    for run in 0..self.n_init {
      let config = KMeansConfig::build()
        .random_generator(StdRng::seed_from_u64(self.seed.wrapping_add(run as u64)))
        .build();
      let state = engine.kmeans_lloyd(k, self.max_iterations, kmeans::KMeans::init_kmeanplusplus, &config);

      let centroids = centroid_rows(&state.centroids.to_vec(), k, d)?;
      let model = ClusterModel { centroids, inertia: state.distsum };
      if best.as_ref().map_or(true, |b| model.inertia < b.inertia) {
        best = Some(model);
      }
    }

    best.ok_or_else(|| TriageError::clustering("no k-means run completed"))
  }
}

/// Unpack `k` centroids from the engine's flat buffer, dropping lane padding
fn centroid_rows(flat: &[f32], k: usize, d: usize) -> Result<Array2<f32>, TriageError> {
  let stride = if k == 0 { 0 } else { flat.len() / k };
  if stride < d {
    return Err(TriageError::clustering(format!(
      "k-means returned {} values for {k} centroids of {d} dimensions",
      flat.len()
    )));
  }
  let values: Vec<f32> = flat.chunks(stride).take(k).flat_map(|row| row[..d].iter().copied()).collect();
  Array2::from_shape_vec((k, d), values).map_err(|e| TriageError::clustering(e.to_string()))
}

fn distinct_rows(data: ArrayView2<f32>) -> usize {
  data
    .rows()
    .into_iter()
    // + 0.0 folds -0.0 into 0.0
    .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<u32>>())
    .collect::<HashSet<_>>()
    .len()
}

fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
  a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// (label, squared distance); ties go to the lowest label
fn nearest_centroid(centroids: &Array2<f32>, row: ArrayView1<f32>) -> (usize, f32) {
  let mut best = (0, f32::INFINITY);
  for (label, centroid) in centroids.rows().into_iter().enumerate() {
    let distance = squared_distance(row, centroid);
    if distance < best.1 {
      best = (label, distance);
    }
  }
  best
}

/// Fit a model to a store sample. An empty sample yields an empty assignment.
pub fn fit(sample: &[VectorRecord], kmeans: &KMeans) -> Result<ClusterAssignment, TriageError> {
  let Some(first) = sample.first() else {
    return Ok(ClusterAssignment::empty());
  };

  let dimension = first.values.len();
  if let Some(odd) = sample.iter().find(|record| record.values.len() != dimension) {
    return Err(TriageError::clustering(format!(
      "record {} has {} dimensions, expected {}",
      odd.id,
      odd.values.len(),
      dimension
    )));
  }

  let flat: Vec<f32> = sample.iter().flat_map(|record| record.values.iter().copied()).collect();
  let data = Array2::from_shape_vec((sample.len(), dimension), flat)
    .map_err(|e| TriageError::clustering(e.to_string()))?;

  let model = kmeans.train(data.view())?;
  let labels = sample
    .iter()
    .zip(data.rows())
    .map(|(record, row)| (record.id.clone(), nearest_centroid(&model.centroids, row).0))
    .collect();

  tracing::info!(
    samples = sample.len(),
    clusters = model.n_clusters(),
    inertia = model.inertia(),
    "fitted cluster model"
  );
  Ok(ClusterAssignment { labels, model: Some(model) })
}

/// Predict the cluster of `vector` under a fitted assignment
pub fn predict(assignment: &ClusterAssignment, vector: &[f32]) -> ClusterPrediction {
  match assignment.model() {
    None => ClusterPrediction::Unavailable,
    Some(model) => match model.predict(vector) {
      Ok(label) => ClusterPrediction::Available(label),
      Err(e) => ClusterPrediction::Error(e.to_string()),
    },
  }
}

struct CachedFit {
  assignment: Arc<ClusterAssignment>,
  fitted_at: Instant,
}

/// Time-bounded cache of the last successful fit; one refit at a time
pub struct ClusterCache {
  kmeans: KMeans,
  sample_size: usize,
  refresh_interval: Duration,
  state: Mutex<Option<CachedFit>>,
}

impl ClusterCache {
  pub fn new(config: &ClusteringConfig) -> Self {
    Self {
      kmeans: KMeans::from_config(config),
      sample_size: config.sample_size,
      refresh_interval: Duration::from_secs(config.refresh_interval_secs),
      state: Mutex::new(None),
    }
  }

  /// Cached assignment if still fresh, otherwise a refit from a new store sample
  pub async fn current(&self, store: &dyn VectorStore) -> Result<Arc<ClusterAssignment>, TriageError> {
    let mut state = self.state.lock().await;
    if let Some(cached) = state.as_ref() {
      if !self.refresh_interval.is_zero() && cached.fitted_at.elapsed() < self.refresh_interval {
        return Ok(cached.assignment.clone());
      }
    }

    let sample = store
      .fetch_sample(self.sample_size)
      .await
      .map_err(|e| TriageError::clustering(format!("failed to sample vectors: {e}")))?;
    let kmeans = self.kmeans.clone();
    let assignment = tokio::task::spawn_blocking(move || fit(&sample, &kmeans))
      .await
      .map_err(|e| TriageError::clustering(format!("fit task failed: {e}")))??;
    let assignment = Arc::new(assignment);

    if assignment.is_empty() {
      *state = None;
    } else {
      *state = Some(CachedFit { assignment: assignment.clone(), fitted_at: Instant::now() });
    }
    Ok(assignment)
  }

  pub async fn predict(&self, store: &dyn VectorStore, vector: &[f32]) -> ClusterPrediction {
    match self.current(store).await {
      Ok(assignment) => predict(&assignment, vector),
      Err(TriageError::ClusteringUnavailable) => ClusterPrediction::Unavailable,
      Err(e) => ClusterPrediction::Error(e.to_string()),
    }
  }

  /// Drop the cached fit so the next call refits
  pub async fn invalidate(&self) {
    *self.state.lock().await = None;
  }
}
