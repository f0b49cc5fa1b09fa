//! Build-log triage with LLM-generated fixes and vector-based error deduplication
//!
//! Incoming CI logs are parsed for an issue key, trimmed to the embedding
//! model's token budget, embedded, and compared against earlier submissions.
//! Only errors judged new reach the fix generator; every submission is
//! recorded so later duplicates can be recognised.
//!
//! External collaborators sit behind traits in [`embeddings`],
//! [`generation`] and [`stores`], and are handed to [`pipeline::AnalysisPipeline`]
//! as a [`pipeline::Services`] bundle.

pub mod clustering;
pub mod config;
pub mod detector;
pub mod embeddings;
pub mod error;
pub mod extract;
pub mod generation;
pub mod parser;
pub mod pipeline;
pub mod recorder;
pub mod server;
pub mod similarity;
pub mod stores;
pub mod tokens;

pub use error::{StoreError, TriageError};
