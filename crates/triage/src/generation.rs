//! LLM-backed fix generation

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::TriageError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const FIX_PROMPT: &str = "You are an agent in charge of helping people fix their broken builds. \
  Analyze these logs and code to identify the error and provide a clear, step-by-step solution. \
  Focus on the actual error shown in the traceback.";

const NEW_CODE_PROMPT: &str = "You are an agent in charge of helping people fix their broken builds. \
  Analyze these logs and code to identify the error and provide a solution for the problem using \
  the code provided. The user should be able to drag and drop the new code into their code and it \
  should work instantly.";

/// Capability: natural-language diagnosis and drop-in replacement code
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FixGenerator: Send + Sync {
  async fn generate_fix(&self, content: &str) -> Result<String, TriageError>;

  async fn generate_replacement_code(&self, content: &str) -> Result<String, TriageError>;
}

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiFixGenerator {
  client: Client,
  endpoint: String,
  config: GenerationConfig,
}

impl OpenAiFixGenerator {
  pub fn new(api_key: &str, config: GenerationConfig) -> Result<Self, TriageError> {
    if api_key.trim().is_empty() {
      return Err(TriageError::config("missing OpenAI API key"));
    }

    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(
      AUTHORIZATION,
      HeaderValue::from_str(&auth).map_err(|_| TriageError::config("invalid OpenAI API key"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let client = Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .default_headers(headers)
      .build()
      .map_err(|e| TriageError::config(format!("failed to build OpenAI HTTP client: {e}")))?;

    let endpoint = format!("{}/chat/completions", config.api_base.trim_end_matches('/'));
    Ok(Self { client, endpoint, config })
  }

  async fn complete(&self, system_prompt: &str, content: &str) -> Result<String, TriageError> {
    let request = ChatRequest {
      model: &self.config.model,
      temperature: self.config.temperature,
      max_tokens: self.config.max_tokens,
      messages: vec![
        ChatMessage { role: "system", content: system_prompt },
        ChatMessage { role: "user", content },
      ],
    };

    let response = self
      .client
      .post(&self.endpoint)
      .json(&request)
      .send()
      .await
      .map_err(|e| TriageError::generation(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
      return Err(TriageError::generation(format!("chat completion failed ({status}): {body}")));
    }

    let parsed: ChatResponse = response
      .json()
      .await
      .map_err(|e| TriageError::generation(format!("failed to parse completion: {e}")))?;

    let choice = parsed
      .choices
      .into_iter()
      .next()
      .ok_or_else(|| TriageError::generation("completion returned no choices"))?;

    tracing::debug!(
      model = %self.config.model,
      finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
      "completion received"
    );
    Ok(choice.message.content.unwrap_or_default())
  }
}

#[async_trait]
impl FixGenerator for OpenAiFixGenerator {
  async fn generate_fix(&self, content: &str) -> Result<String, TriageError> {
    self.complete(FIX_PROMPT, content).await
  }

  async fn generate_replacement_code(&self, content: &str) -> Result<String, TriageError> {
    self.complete(NEW_CODE_PROMPT, content).await
  }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
  messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role: &'a str,
  content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
  #[serde(default)]
  choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
  message: ChoiceMessage,
  #[serde(default)]
  finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
  #[serde(default)]
  content: Option<String>,
}
