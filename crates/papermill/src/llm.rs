//! Client for OpenAI-compatible chat completion APIs.
//!
//! The default configuration targets DashScope's compatible mode, but any service exposing
//! `POST <base>/chat/completions` with bearer authentication works. Requests are built with a
//! small builder:
//!
//! ```no_run
//! use papermill::llm::ChatRequest;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = reqwest::Client::new();
//! let reply = ChatRequest::new()
//!   .with_base_url("https://dashscope.aliyuncs.com/compatible-mode/v1")
//!   .with_api_key("sk-...")
//!   .with_model("qwen-plus")
//!   .with_message("Summarize quantum error correction in one paragraph.")
//!   .send(&client)
//!   .await?;
//! println!("{}", reply.content()?);
//! # Ok(())
//! # }
//! ```
//!
//! The pipeline and the translator only see the [`Completion`] trait, so tests swap in fakes.

use super::*;
use crate::config::LlmConfig;

/// Something that can answer a single-turn prompt.
#[async_trait]
pub trait Completion: Send + Sync {
  /// Sends `prompt` as one user message and returns the reply text.
  async fn complete(&self, prompt: &str) -> Result<String>;
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  /// `"user"`, `"system"` or `"assistant"`
  pub role:    String,
  /// Message text
  pub content: String,
}

/// Request builder for chat completions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatRequest {
  /// Model name; required before sending
  pub model:    Option<String>,
  /// Conversation so far; must not be empty when sending
  pub messages: Vec<Message>,
  /// Vendor-specific top-level fields merged into the body
  #[serde(flatten)]
  pub extra:    serde_json::Map<String, serde_json::Value>,
  /// Service base URL, not serialized
  #[serde(skip)]
  pub base_url: Option<Url>,
  /// Bearer token, not serialized
  #[serde(skip)]
  pub api_key:  Option<String>,
}

/// Response body of a chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
  /// Generated alternatives; only the first is used
  #[serde(default)]
  pub choices: Vec<Choice>,
  /// Model that produced the reply
  #[serde(default)]
  pub model:   Option<String>,
}

/// One generated alternative.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
  /// The generated message
  pub message: Message,
}

impl ChatResponse {
  /// Text of the first choice.
  pub fn content(&self) -> Result<&str> {
    self
      .choices
      .first()
      .map(|choice| choice.message.content.as_str())
      .ok_or_else(|| MillError::ApiError("completion returned no choices".to_string()))
  }
}

impl ChatRequest {
  /// Creates an empty request.
  pub fn new() -> Self { Self::default() }

  /// Sets the service base URL, for example `https://api.openai.com/v1`.
  ///
  /// An unparseable URL is logged and ignored, leaving the request without a base URL.
  pub fn with_base_url(mut self, base_url: &str) -> Self {
    // `Url::join` drops the last segment unless the base ends with a slash.
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    self.base_url = Url::parse(&normalized)
      .map_err(|e| warn!("Ignoring invalid completion base URL {base_url:?}: {e}"))
      .ok();
    self
  }

  /// Sets the bearer token.
  pub fn with_api_key(mut self, api_key: &str) -> Self {
    self.api_key = Some(api_key.to_string());
    self
  }

  /// Sets the model.
  pub fn with_model(mut self, model: &str) -> Self {
    self.model.replace(model.to_string());
    self
  }

  /// Appends a user message.
  pub fn with_message(mut self, content: &str) -> Self {
    self.messages.push(Message { role: "user".to_string(), content: content.to_string() });
    self
  }

  /// Adds a vendor-specific top-level field to the request body.
  pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
    self.extra.insert(key.to_string(), value);
    self
  }

  /// Sends the request with `client`.
  ///
  /// # Errors
  ///
  /// - [`MillError::LLMMissingModel`] or [`MillError::LLMMissingMessage`] for incomplete requests
  /// - [`MillError::Config`] when no base URL is set
  /// - [`MillError::Network`] for transport failures and non-success statuses
  pub async fn send(&self, client: &reqwest::Client) -> Result<ChatResponse> {
    if self.model.is_none() {
      return Err(MillError::LLMMissingModel);
    }
    if self.messages.is_empty() {
      return Err(MillError::LLMMissingMessage);
    }
    let Some(base_url) = &self.base_url else {
      return Err(MillError::Config("no completion base URL set".to_string()));
    };
    let url = base_url
      .join("chat/completions")
      .map_err(|e| MillError::Config(format!("invalid completion URL: {e}")))?;

    let mut request = client.post(url).json(self);
    if let Some(key) = &self.api_key {
      request = request.bearer_auth(key);
    }
    let response = request.send().await?;
    if !response.status().is_success() {
      trace!("Completion response: {response:?}");
    }
    Ok(response.error_for_status()?.json().await?)
  }
}

/// [`Completion`] implementation for one configured model.
#[derive(Debug, Clone)]
pub struct ChatClient {
  /// Template every prompt is sent with
  template: ChatRequest,
  /// Client with the configured timeout
  client:   reqwest::Client,
  /// Extra attempts for transient failures
  retries:  u32,
}

impl ChatClient {
  /// Creates a client for `model`.
  pub fn new(
    base_url: &str,
    api_key: &str,
    model: &str,
    timeout: Duration,
    retries: u32,
  ) -> Result<Self> {
    let template =
      ChatRequest::new().with_base_url(base_url).with_api_key(api_key).with_model(model);
    if template.base_url.is_none() {
      return Err(MillError::Config(format!("invalid completion base URL {base_url:?}")));
    }
    Ok(Self { template, client: retry::client(timeout)?, retries })
  }

  /// Builds a client for `model` from configuration, or `None` when no API key is set.
  pub fn from_config(config: &LlmConfig, model: &str, retries: u32) -> Result<Option<Self>> {
    match config.api_key.as_deref().filter(|key| !key.trim().is_empty()) {
      Some(key) => Ok(Some(Self::new(
        &config.base_url,
        key,
        model,
        Duration::from_secs(config.timeout_secs),
        retries,
      )?)),
      None => Ok(None),
    }
  }

  /// Adds a vendor-specific field to every request this client sends.
  pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
    self.template = self.template.with_extra(key, value);
    self
  }
}

#[async_trait]
impl Completion for ChatClient {
  async fn complete(&self, prompt: &str) -> Result<String> {
    let request = self.template.clone().with_message(prompt);
    debug!("Sending {} character prompt to {:?}", prompt.len(), request.model);
    let response =
      retry::with_backoff("completion", self.retries, || request.send(&self.client)).await?;
    Ok(response.content()?.to_string())
  }
}
