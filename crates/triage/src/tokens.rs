//! Token budget enforcement ahead of embedding
//!
//! Oversized logs are cut from the front: the failure that broke a build is
//! almost always at the tail, so the tail is what survives. Repository code
//! context only gets the budget the logs leave over, and is cut from the back.

use tiktoken_rs::{cl100k_base, get_bpe_from_model, o200k_base, p50k_base, r50k_base, CoreBPE};

use crate::error::TriageError;
use crate::parser::CODE_CONTEXT_HEADER;

pub const DEFAULT_MAX_TOKENS: usize = 8000;

// Snap a cut to the next line start only when it lands this close to one
const LINE_SNAP_WINDOW: usize = 512;

pub struct TokenNormalizer {
  bpe: CoreBPE,
  encoding: String,
  max_tokens: usize,
}

impl TokenNormalizer {
  /// Load the named encoding (or model) with the default 8000-token ceiling
  pub fn new(encoding_name: &str) -> Result<Self, TriageError> {
    Self::with_ceiling(encoding_name, DEFAULT_MAX_TOKENS)
  }

  pub fn with_ceiling(encoding_name: &str, max_tokens: usize) -> Result<Self, TriageError> {
    if max_tokens == 0 {
      return Err(TriageError::tool("token ceiling must be positive"));
    }
    let bpe = load_encoding(encoding_name)?;
    Ok(Self { bpe, encoding: encoding_name.to_string(), max_tokens })
  }

  pub fn encoding(&self) -> &str {
    &self.encoding
  }

  pub fn max_tokens(&self) -> usize {
    self.max_tokens
  }

  pub fn count(&self, text: &str) -> usize {
    self.bpe.encode_ordinary(text).len()
  }

  /// Return `text` unchanged when it fits, otherwise its longest fitting tail
  pub fn normalize(&self, text: &str) -> String {
    let total = self.count(text);
    if total <= self.max_tokens {
      return text.to_string();
    }

    let cut = self.tail_cut(text, self.max_tokens);
    let kept = &text[cut..];
    tracing::warn!(
      "Truncating text from {} to {} tokens (kept last {} of {} bytes)",
      total,
      self.count(kept),
      kept.len(),
      text.len()
    );
    kept.to_string()
  }

  /// Normalize `logs`, then append as much of the head of `context` as the
  /// remaining budget allows. The logs never give up tokens to the context.
  pub fn normalize_with_context(&self, logs: &str, context: &str) -> String {
    let logs = self.normalize(logs);
    let framed = format!("{logs}{CODE_CONTEXT_HEADER}");
    let used = self.count(&framed);
    if used >= self.max_tokens {
      tracing::warn!("No token budget left for code context; embedding logs only");
      return logs;
    }

    // Token counts are not quite additive across the join, so shrink until it fits
    let mut budget = self.max_tokens - used;
    while budget > 0 {
      let head = &context[..self.head_cut(context, budget)];
      if head.trim().is_empty() {
        break;
      }
      let combined = format!("{framed}{head}");
      if self.fits(&combined, self.max_tokens) {
        if head.len() < context.len() {
          tracing::warn!(kept = head.len(), total = context.len(), "Truncating code context");
        }
        return combined;
      }
      budget -= 1;
    }
    logs
  }

  /// Smallest char-boundary offset whose suffix fits `ceiling`
  fn tail_cut(&self, text: &str, ceiling: usize) -> usize {
    let boundaries = char_boundaries(text);

    // boundaries[lo] never fits, boundaries[hi] always does
    let mut lo = 0;
    let mut hi = boundaries.len() - 1;
    while lo + 1 < hi {
      let mid = lo + (hi - lo) / 2;
      if self.fits(&text[boundaries[mid]..], ceiling) {
        hi = mid;
      } else {
        lo = mid;
      }
    }

    let cut = boundaries[hi];
    self.snap_to_line_start(text, cut, ceiling)
  }

  /// Largest char-boundary offset whose prefix fits `ceiling`
  fn head_cut(&self, text: &str, ceiling: usize) -> usize {
    if self.fits(text, ceiling) {
      return text.len();
    }
    let boundaries = char_boundaries(text);

    // boundaries[lo] always fits, boundaries[hi] never does
    let mut lo = 0;
    let mut hi = boundaries.len() - 1;
    while lo + 1 < hi {
      let mid = lo + (hi - lo) / 2;
      if self.fits(&text[..boundaries[mid]], ceiling) {
        lo = mid;
      } else {
        hi = mid;
      }
    }

    let cut = boundaries[lo];
    match text[..cut].rfind('\n') {
      Some(newline) if cut - newline <= LINE_SNAP_WINDOW && newline > 0 => newline + 1,
      _ => cut,
    }
  }

  fn snap_to_line_start(&self, text: &str, cut: usize, ceiling: usize) -> usize {
    if cut == 0 || text.as_bytes()[cut - 1] == b'\n' {
      return cut;
    }
    match text[cut..].find('\n') {
      Some(offset) if offset < LINE_SNAP_WINDOW && cut + offset + 1 < text.len() => {
        let snapped = cut + offset + 1;
        if self.fits(&text[snapped..], ceiling) {
          snapped
        } else {
          cut
        }
      }
      _ => cut,
    }
  }

  fn fits(&self, text: &str, ceiling: usize) -> bool {
    self.count(text) <= ceiling
  }
}

fn char_boundaries(text: &str) -> Vec<usize> {
  text.char_indices().map(|(offset, _)| offset).chain(std::iter::once(text.len())).collect()
}

/// One-shot form: load `encoding_name` and normalize `text` under the default ceiling
pub fn normalize(text: &str, encoding_name: &str) -> Result<String, TriageError> {
  Ok(TokenNormalizer::new(encoding_name)?.normalize(text))
}

fn load_encoding(name: &str) -> Result<CoreBPE, TriageError> {
  let loaded = match name {
    "cl100k_base" => cl100k_base(),
    "o200k_base" => o200k_base(),
    "p50k_base" => p50k_base(),
    "r50k_base" => r50k_base(),
    model => get_bpe_from_model(model),
  };
  loaded.map_err(|e| TriageError::tool(format!("unknown encoding '{name}': {e}")))
}
