//! End-to-end analysis of one submission
//!
//! parse → normalize → embed → duplicate check → (fix generation) → record.
//! Code context counts toward the embedding only within the token budget the
//! logs leave over, but reaches the fix generator whole.
//! Embedding and fix generation are mandatory and propagate their errors;
//! everything after the decision is best-effort.

use chrono::SecondsFormat;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::clustering::ClusterCache;
use crate::config::TriageConfig;
use crate::detector::{DecisionReason, DuplicateDetector};
use crate::embeddings::{EmbeddingGenerator, EmbeddingService};
use crate::error::TriageError;
use crate::extract::{self, UNKNOWN_FILE};
use crate::generation::FixGenerator;
use crate::parser::{self, LogPacket};
use crate::recorder::VectorStoreWriter;
use crate::stores::{LogRow, LogStore, SimilarityMatch, VectorMetadata, VectorStore};
use crate::tokens::TokenNormalizer;

/// External capabilities the pipeline is built from
#[derive(Clone)]
pub struct Services {
  pub embeddings: Arc<dyn EmbeddingService>,
  pub vectors: Arc<dyn VectorStore>,
  pub logs: Arc<dyn LogStore>,
  pub generator: Arc<dyn FixGenerator>,
}

/// Decoded submission
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
  /// Opaque caller identity (the submitted API key)
  pub caller_id: String,
  pub logs: String,
  pub code_context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
  pub error_id: String,
  pub duplicate: bool,
  pub reason: DecisionReason,
  /// Absent when the submission was a duplicate
  pub analysis: Option<String>,
  pub new_code: Option<String>,
  pub old_code: String,
  pub file_name: String,
  pub issue: String,
  pub repository: String,
  pub similar: Vec<SimilarityMatch>,
  /// Whether the vector reached the vector store
  pub recorded: bool,
}

pub struct AnalysisPipeline {
  normalizer: Arc<TokenNormalizer>,
  embedder: EmbeddingGenerator,
  detector: DuplicateDetector,
  writer: VectorStoreWriter,
  logs: Arc<dyn LogStore>,
  generator: Arc<dyn FixGenerator>,
  genre: String,
}

impl AnalysisPipeline {
  pub fn new(config: &TriageConfig, services: Services) -> Result<Self, TriageError> {
    config.validate()?;

    let normalizer =
      Arc::new(TokenNormalizer::with_ceiling(&config.tokens.encoding, config.tokens.max_tokens)?);
    let embedder = EmbeddingGenerator::new(services.embeddings, &config.embedding);
    let detector = DuplicateDetector::new(
      services.logs.clone(),
      services.vectors.clone(),
      ClusterCache::new(&config.clustering),
      config.similarity.clone(),
      config.dedup.clone(),
    );
    let writer = VectorStoreWriter::new(services.vectors, config.vector_store.metric);

    Ok(Self {
      normalizer,
      embedder,
      detector,
      writer,
      logs: services.logs,
      generator: services.generator,
      genre: config.similarity.genre.clone(),
    })
  }

  pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport, TriageError> {
    if request.logs.trim().is_empty() {
      return Err(TriageError::EmptyLogs);
    }

    let parsed = parser::parse(&request.logs);
    let context = request.code_context.clone().filter(|c| !c.trim().is_empty());

    let text = self.embedding_text(parsed.normalized_logs(), context.clone()).await?;
    let vector = self.embedder.embed(&text).await?;

    let packet = match context.as_deref() {
      Some(context) => parsed.with_code_context(context),
      None => parsed,
    };

    let issue_key = packet.issue_key();
    let decision = self.detector.is_duplicate(&request.caller_id, issue_key.as_ref(), &vector).await;

    let (analysis, new_code) = if decision.duplicate {
      tracing::info!(caller_id = %request.caller_id, reason = %decision.reason, "skipping fix generation");
      (None, None)
    } else {
      let analysis = self.generator.generate_fix(packet.normalized_logs()).await?;
      let new_code = self.generator.generate_replacement_code(packet.normalized_logs()).await?;
      (Some(analysis), Some(new_code))
    };

    let (old_code, file_name) = source_snippet(&packet, &request);
    let issue = issue_key.map(|key| key.to_string()).unwrap_or_else(|| UNKNOWN_FILE.to_string());
    let repository = extract::extract_repository(&request.logs);
    let error_id = Uuid::new_v4().to_string();

    let metadata = VectorMetadata {
      genre: self.genre.clone(),
      caller_id: request.caller_id.clone(),
      issue: issue.clone(),
      timestamp: packet.timestamp().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    let recorded = self.writer.record(&error_id, &vector, metadata).await;

    let row = LogRow {
      caller_id: request.caller_id.clone(),
      issue: issue.clone(),
      repository: repository.clone(),
      timestamp: packet.timestamp(),
    };
    if let Err(e) = self.logs.insert_log(&row).await {
      let error = TriageError::StoreWriteFailure { message: e.to_string() };
      tracing::error!(caller_id = %request.caller_id, "{error}");
    }

    Ok(AnalysisReport {
      error_id,
      duplicate: decision.duplicate,
      reason: decision.reason,
      analysis,
      new_code,
      old_code,
      file_name,
      issue,
      repository,
      similar: decision.similar,
      recorded,
    })
  }

  /// Token-bounded text to embed: the logs' tail first, then whatever code
  /// context still fits. Runs on the blocking pool.
  async fn embedding_text(&self, logs: &str, context: Option<String>) -> Result<String, TriageError> {
    let normalizer = self.normalizer.clone();
    let logs = logs.to_string();
    tokio::task::spawn_blocking(move || match context {
      Some(context) => normalizer.normalize_with_context(&logs, &context),
      None => normalizer.normalize(&logs),
    })
    .await
    .map_err(|e| TriageError::tool(format!("normalization task failed: {e}")))
  }
}

/// Code the fix applies to: the code context's file block, else a block in the logs
fn source_snippet(packet: &LogPacket, request: &AnalysisRequest) -> (String, String) {
  let default_name = packet.file_name().unwrap_or(UNKNOWN_FILE).to_string();

  if let Some(found) = request.code_context.as_deref().and_then(extract::code_from_context) {
    return (found.code, found.file_name);
  }

  match extract::code_from_logs(&request.logs) {
    Some(found) if found.file_name != UNKNOWN_FILE => (found.code, found.file_name),
    Some(found) => (found.code, default_name),
    None => (String::new(), default_name),
  }
}
