//! Log parsing: error identity extraction from raw CI output
//!
//! The issue key is taken from the deepest Python-style traceback frame
//! (`File "x.py", line 3, in handler`). Without a traceback the last plain
//! `File "x.py", line 3` mention is used. Logs matching neither pattern are
//! still valid input; they simply carry no key.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static TRACEBACK_FRAME: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"File "([^"]+)", line (\d+), in ([^\s]+)"#).expect("valid traceback regex")
});

static FILE_LINE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("valid file/line regex"));

static ANSI_ESCAPE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ansi regex"));

// GitHub Actions prefixes every line with an RFC 3339 timestamp
static RUNNER_TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?m)^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z ").expect("valid timestamp regex")
});

/// Identity of an error occurrence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueKey {
  pub file_name: String,
  pub line_number: u32,
}

impl IssueKey {
  pub fn new(file_name: impl Into<String>, line_number: u32) -> Self {
    Self { file_name: file_name.into(), line_number }
  }
}

impl fmt::Display for IssueKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.file_name, self.line_number)
  }
}

/// Separator between log text and appended repository code
pub const CODE_CONTEXT_HEADER: &str = "\n\nCode context from repository:\n";

/// Parsed form of one incoming analysis request's logs
#[derive(Debug, Clone)]
pub struct LogPacket {
  raw_logs: String,
  normalized_logs: String,
  file_name: Option<String>,
  line_number: Option<u32>,
  function: Option<String>,
  timestamp: DateTime<Utc>,
}

impl LogPacket {
  pub fn raw_logs(&self) -> &str {
    &self.raw_logs
  }

  pub fn normalized_logs(&self) -> &str {
    &self.normalized_logs
  }

  pub fn file_name(&self) -> Option<&str> {
    self.file_name.as_deref()
  }

  pub fn line_number(&self) -> Option<u32> {
    self.line_number
  }

  /// Function of the matched traceback frame; context only, not part of the key
  pub fn function(&self) -> Option<&str> {
    self.function.as_deref()
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    self.timestamp
  }

  pub fn issue_key(&self) -> Option<IssueKey> {
    match (&self.file_name, self.line_number) {
      (Some(file), Some(line)) => Some(IssueKey::new(file.clone(), line)),
      _ => None,
    }
  }

  /// New packet whose text also carries repository code context
  pub fn with_code_context(&self, code_context: &str) -> LogPacket {
    LogPacket {
      normalized_logs: format!("{}{CODE_CONTEXT_HEADER}{}", self.normalized_logs, code_context),
      ..self.clone()
    }
  }
}

struct FrameMatch {
  file_name: String,
  line_number: u32,
  function: Option<String>,
}

/// Parse raw logs into a packet. Never fails.
pub fn parse(logs: &str) -> LogPacket {
  let normalized_logs = normalize_text(logs);

  let frame = last_traceback_frame(&normalized_logs).or_else(|| last_file_line(&normalized_logs));

  if frame.is_none() {
    tracing::info!("no file/line pattern found in logs; issue key absent");
  }

  let (file_name, line_number, function) = match frame {
    Some(frame) => (Some(frame.file_name), Some(frame.line_number), frame.function),
    None => (None, None, None),
  };

  LogPacket {
    raw_logs: logs.to_string(),
    normalized_logs,
    file_name,
    line_number,
    function,
    timestamp: Utc::now(),
  }
}

fn last_traceback_frame(text: &str) -> Option<FrameMatch> {
  TRACEBACK_FRAME
    .captures_iter(text)
    .filter_map(|caps| {
      let line_number = caps[2].parse::<u32>().ok()?;
      Some(FrameMatch {
        file_name: caps[1].to_string(),
        line_number,
        function: Some(caps[3].trim_end_matches(',').to_string()),
      })
    })
    .last()
}

fn last_file_line(text: &str) -> Option<FrameMatch> {
  FILE_LINE
    .captures_iter(text)
    .filter_map(|caps| {
      let line_number = caps[2].parse::<u32>().ok()?;
      Some(FrameMatch { file_name: caps[1].to_string(), line_number, function: None })
    })
    .last()
}

/// Strip runner noise so the same failure yields the same text across runs
fn normalize_text(logs: &str) -> String {
  let unified = logs.replace("\r\n", "\n");
  let without_ansi = ANSI_ESCAPE.replace_all(&unified, "");
  let without_timestamps = RUNNER_TIMESTAMP.replace_all(&without_ansi, "");

  without_timestamps.lines().map(str::trim_end).collect::<Vec<_>>().join("\n").trim().to_string()
}
