//! Runtime configuration
//!
//! Every section has defaults, so an absent or partial YAML file is valid.
//! Secrets never live in the file; the server binary reads them from the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::TriageError;
use crate::stores::Metric;

/// Longest accepted dedup look-back, one year
pub const MAX_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;

pub const SUPPORTED_EMBEDDING_MODELS: [&str; 3] =
  ["text-embedding-ada-002", "text-embedding-3-small", "text-embedding-3-large"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
  pub embedding: EmbeddingConfig,
  pub tokens: TokenConfig,
  pub clustering: ClusteringConfig,
  pub similarity: SimilarityConfig,
  pub dedup: DedupConfig,
  pub vector_store: VectorStoreConfig,
  pub log_store: LogStoreConfig,
  pub generation: GenerationConfig,
  pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  pub model: String,
  pub dimensions: usize,
  pub api_base: String,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      model: "text-embedding-3-small".to_string(),
      dimensions: 1536,
      api_base: "https://api.openai.com/v1".to_string(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
  pub encoding: String,
  pub max_tokens: usize,
}

impl Default for TokenConfig {
  fn default() -> Self {
    Self { encoding: "cl100k_base".to_string(), max_tokens: 8000 }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
  pub n_clusters: usize,
  pub sample_size: usize,
  pub random_seed: u64,
  pub n_init: usize,
  pub max_iterations: usize,
  /// Seconds a fitted model stays valid; 0 refits on every duplicate check
  pub refresh_interval_secs: u64,
}

impl Default for ClusteringConfig {
  fn default() -> Self {
    Self {
      n_clusters: 8,
      sample_size: 1000,
      random_seed: 42,
      n_init: 10,
      max_iterations: 300,
      refresh_interval_secs: 300,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
  pub top_k: usize,
  pub threshold: f32,
  pub genre: String,
}

impl Default for SimilarityConfig {
  fn default() -> Self {
    Self { top_k: 3, threshold: 0.85, genre: "errors".to_string() }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
  pub recency_window_secs: i64,
  pub exact_match_window_secs: i64,
}

impl Default for DedupConfig {
  fn default() -> Self {
    Self { recency_window_secs: 60 * 60, exact_match_window_secs: 24 * 60 * 60 }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
  pub index_name: String,
  pub metric: Metric,
  pub cloud: String,
  pub region: String,
  pub control_plane_url: String,
  /// Data-plane host; resolved from the control plane when absent
  pub host: Option<String>,
}

impl Default for VectorStoreConfig {
  fn default() -> Self {
    Self {
      index_name: "github-actions-errors".to_string(),
      metric: Metric::Cosine,
      cloud: "aws".to_string(),
      region: "us-west-2".to_string(),
      control_plane_url: "https://api.pinecone.io".to_string(),
      host: None,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
  /// e.g. `sqlite://triage.db`; in-memory storage when absent
  pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  pub model: String,
  pub temperature: f32,
  pub max_tokens: Option<u32>,
  pub api_base: String,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      model: "gpt-4o".to_string(),
      temperature: 0.7,
      max_tokens: None,
      api_base: "https://api.openai.com/v1".to_string(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub bind: String,
  pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "127.0.0.1:8000".to_string(),
      allowed_origins: vec![
        "https://githubactionschatbot.onrender.com".to_string(),
        "http://localhost:3000".to_string(),
      ],
    }
  }
}

impl TriageConfig {
  /// Load configuration from `path`, or from the default location if it exists
  pub fn load(path: Option<&Path>) -> Result<Self, TriageError> {
    let path = match path {
      Some(path) => path.to_path_buf(),
      None => match default_config_path() {
        Some(path) if path.exists() => path,
        _ => return Ok(Self::default()),
      },
    };

    let contents = std::fs::read_to_string(&path)
      .map_err(|e| TriageError::config(format!("cannot read {}: {e}", path.display())))?;
    let config = Self::from_yaml(&contents)?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(config)
  }

  pub fn from_yaml(contents: &str) -> Result<Self, TriageError> {
    let config: TriageConfig =
      serde_yaml::from_str(contents).map_err(|e| TriageError::config(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), TriageError> {
    if !SUPPORTED_EMBEDDING_MODELS.contains(&self.embedding.model.as_str()) {
      return Err(TriageError::config(format!(
        "embedding model must be one of: {}",
        SUPPORTED_EMBEDDING_MODELS.join(", ")
      )));
    }
    if self.embedding.dimensions == 0 {
      return Err(TriageError::config("embedding dimensions must be positive"));
    }
    if self.tokens.max_tokens == 0 {
      return Err(TriageError::config("token ceiling must be positive"));
    }
    if !(2..=100).contains(&self.clustering.n_clusters) {
      return Err(TriageError::config("n_clusters must be between 2 and 100"));
    }
    if self.clustering.n_init == 0 || self.clustering.max_iterations == 0 {
      return Err(TriageError::config("n_init and max_iterations must be positive"));
    }
    if self.similarity.top_k == 0 {
      return Err(TriageError::config("similarity top_k must be positive"));
    }
    if !(-1.0..=1.0).contains(&self.similarity.threshold) {
      return Err(TriageError::config("similarity threshold must be within [-1, 1]"));
    }
    for (name, secs) in [
      ("recency_window_secs", self.dedup.recency_window_secs),
      ("exact_match_window_secs", self.dedup.exact_match_window_secs),
    ] {
      if !(1..=MAX_WINDOW_SECS).contains(&secs) {
        return Err(TriageError::config(format!("{name} must be between 1 and {MAX_WINDOW_SECS}")));
      }
    }
    Ok(())
  }
}

/// `~/.triage/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
  dirs::home_dir().map(|home| home.join(".triage").join("config.yaml"))
}
