//! Request payload helpers: base64 decoding, repository and source extraction

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

use crate::error::TriageError;

pub const UNKNOWN_REPOSITORY: &str = "unknown/repo";
pub const UNKNOWN_FILE: &str = "unknown";

static REPOSITORY: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"github\.com/([^/\s]+/[^/\s]+)").expect("valid repository regex"));

static FILE_BLOCK: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?s)===BEGIN_FILE: ([^=]+)===\n(.*?)===END_FILE===").expect("valid file block regex")
});

static CODE_FENCE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?s)```\w*\n(.*?)```").expect("valid code fence regex"));

static FILE_HEADER: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"FILE: ([^,]+), LINE:").expect("valid file header regex"));

/// Source snippet the fix applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeExtraction {
  pub code: String,
  pub file_name: String,
}

/// Decode a base64 payload into UTF-8 text
pub fn decode_payload(encoded: &str) -> Result<String, TriageError> {
  let bytes =
    STANDARD.decode(encoded.trim()).map_err(|e| TriageError::payload(format!("invalid base64: {e}")))?;
  String::from_utf8(bytes).map_err(|e| TriageError::payload(format!("not UTF-8: {e}")))
}

/// `owner/repo` from the first github.com URL in the logs
pub fn extract_repository(logs: &str) -> String {
  REPOSITORY
    .captures(logs)
    .map(|caps| caps[1].trim_end_matches(".git").to_string())
    .unwrap_or_else(|| UNKNOWN_REPOSITORY.to_string())
}

/// First `===BEGIN_FILE===` block of a decoded code context
pub fn code_from_context(context: &str) -> Option<CodeExtraction> {
  let caps = FILE_BLOCK.captures(context)?;
  let block_name = caps[1].trim();
  let content = &caps[2];

  // Block names look like `<prefix>_<file>_<suffix>`
  let mut file_name = match block_name.rsplit('_').nth(1) {
    Some(part) if block_name.contains('_') && !part.is_empty() => part.to_string(),
    _ => UNKNOWN_FILE.to_string(),
  };

  if let Some(header) = FILE_HEADER.captures(content) {
    let path = header[1].trim();
    file_name = Path::new(path)
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.to_string());
  }

  let mut lines: Vec<&str> = content.split('\n').collect();
  if lines.first().is_some_and(|first| first.contains("FILE:") && first.contains("LINE:")) {
    lines.remove(0);
  }

  let code = lines.join("\n").trim().to_string();
  if code.is_empty() {
    return None;
  }
  Some(CodeExtraction { code, file_name })
}

/// First fenced code block in the logs, else the first file block
pub fn code_from_logs(logs: &str) -> Option<CodeExtraction> {
  if let Some(caps) = CODE_FENCE.captures(logs) {
    return Some(CodeExtraction { code: caps[1].to_string(), file_name: UNKNOWN_FILE.to_string() });
  }

  FILE_BLOCK.captures(logs).map(|caps| CodeExtraction {
    code: caps[2].to_string(),
    file_name: caps[1].trim().to_string(),
  })
}
