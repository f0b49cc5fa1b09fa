//! Build Triage REST Server
//!
//! Serves the analysis pipeline over HTTP. Provider credentials come from the
//! environment; everything else from an optional YAML config file.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use triage::config::TriageConfig;
use triage::embeddings::OpenAiEmbeddingService;
use triage::generation::OpenAiFixGenerator;
use triage::pipeline::{AnalysisPipeline, Services};
use triage::server::startup::start_server;
use triage::stores::{
  InMemoryLogStore, InMemoryVectorStore, LogStore, PineconeVectorStore, SqliteLogStore, VectorStore,
};

#[derive(Parser)]
#[command(name = "triage_server")]
#[command(about = "Build log triage REST API server")]
#[command(version)]
struct Args {
  /// Path to a YAML config file (defaults to ~/.triage/config.yaml when present)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Server bind address; overrides the config file
  #[arg(long)]
  bind: Option<SocketAddr>,

  /// OpenAI API key for embeddings and fix generation
  #[arg(long, env = "OPENAI_KEY", hide_env_values = true)]
  openai_key: String,

  /// Pinecone API key; vectors are kept in memory when absent
  #[arg(long, env = "PINECONE_KEY", hide_env_values = true)]
  pinecone_key: Option<String>,

  /// SQLite URL for the submission log; overrides the config file
  #[arg(long, env = "TRIAGE_DATABASE_URL")]
  database_url: Option<String>,

  /// Enable verbose logging
  #[arg(short, long)]
  verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  let filter = if args.verbose {
    EnvFilter::new("triage=debug,tower_http=debug,sqlx=warn,info")
  } else {
    EnvFilter::try_from_default_env()
      .unwrap_or_else(|_| EnvFilter::new("triage=info,tower_http=info,sqlx=warn,warn"))
  };
  tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

  let mut config = TriageConfig::load(args.config.as_deref())?;
  if let Some(url) = args.database_url {
    config.log_store.database_url = Some(url);
  }
  let bind: SocketAddr = match args.bind {
    Some(bind) => bind,
    None => config.server.bind.parse().with_context(|| format!("invalid bind address {}", config.server.bind))?,
  };

  tracing::info!("Starting build triage server v{}", env!("CARGO_PKG_VERSION"));

  let services = build_services(&config, &args.openai_key, args.pinecone_key.as_deref()).await?;
  let pipeline = Arc::new(AnalysisPipeline::new(&config, services)?);

  start_server(bind, pipeline, &config.server.allowed_origins).await
}

async fn build_services(
  config: &TriageConfig,
  openai_key: &str,
  pinecone_key: Option<&str>,
) -> Result<Services> {
  let mut embeddings = OpenAiEmbeddingService::new(openai_key, &config.embedding.api_base)?;
  if config.embedding.model != "text-embedding-ada-002" {
    embeddings = embeddings.with_dimensions(config.embedding.dimensions);
  }
  let generator = OpenAiFixGenerator::new(openai_key, config.generation.clone())?;

  let vectors: Arc<dyn VectorStore> = match pinecone_key {
    Some(key) => {
      tracing::info!(index = %config.vector_store.index_name, "using Pinecone vector store");
      Arc::new(PineconeVectorStore::new(key, config.vector_store.clone())?)
    }
    None => {
      tracing::warn!("PINECONE_KEY not set; error vectors are kept in memory only");
      Arc::new(InMemoryVectorStore::new())
    }
  };

  let logs: Arc<dyn LogStore> = match config.log_store.database_url.as_deref() {
    Some(url) => Arc::new(SqliteLogStore::connect(url).await?),
    None => {
      tracing::warn!("no log store database configured; submission log is kept in memory only");
      Arc::new(InMemoryLogStore::new())
    }
  };

  Ok(Services { embeddings: Arc::new(embeddings), vectors, logs, generator: Arc::new(generator) })
}
