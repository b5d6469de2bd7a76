//! Configuration for the pipeline and its collaborators.
//!
//! Configuration lives in a TOML file (by default `~/.config/papermill/config.toml`). Every
//! field has a default, so an empty file is valid. Environment variables are applied on top of
//! the file by [`Config::apply_env`]:
//!
//! | variable | field |
//! |---|---|
//! | `PDF_PARSER_URL` | `parser.url` |
//! | `DASHSCOPE_API_KEY` | `llm.api_key` |
//! | `DASHSCOPE_BASE_URL` | `llm.base_url` |
//! | `BACKEND_PUBLIC_URL` | `public_url` |
//! | `SENDER_EMAIL` | `delivery.sender` |
//! | `RECIPIENT_EMAILS` | `delivery.default_recipients` (comma separated) |
//! | `EMAIL_SUBJECT` | `delivery.subject` |
//! | `MAIL_RELAY_URL` | `delivery.relay_url` |
//! | `MAIL_RELAY_TOKEN` | `delivery.relay_token` |
//!
//! # Example
//!
//! ```toml
//! data_dir = "/var/lib/papermill"
//! public_url = "https://papers.example.com"
//!
//! [parser]
//! url = "http://localhost:8000/file_parse"
//!
//! [llm]
//! api_key = "sk-..."
//! model = "qwen-plus"
//!
//! [delivery]
//! default_recipients = ["me@example.com"]
//!
//! [search]
//! default_categories = ["cs.AI", "cs.LG"]
//! ```

use super::*;

/// Prompt used when no `prompt_path` is configured.
const DEFAULT_PROMPT: &str = include_str!("../prompts/analyzer.md");

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Directory holding the history, the artifacts, the outbox and scratch files
  pub data_dir:          PathBuf,
  /// Base URL clients use to reach this service; image links in documents point here
  pub public_url:        String,
  /// Analysis instructions, replacing the built-in prompt
  pub prompt_path:       Option<PathBuf>,
  /// Extra attempts for transient HTTP failures
  pub retries:           u32,
  /// Timeout for downloads, search and delivery requests
  pub http_timeout_secs: u64,
  /// PDF parsing service
  pub parser:            ParserConfig,
  /// Language model service
  pub llm:               LlmConfig,
  /// Outbound delivery
  pub delivery:          DeliveryConfig,
  /// arXiv search
  pub search:            SearchConfig,
}

/// PDF parsing service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
  /// Endpoint PDFs are posted to; analysis fails with a diagnostic when unset
  pub url:          Option<String>,
  /// Per-request timeout
  pub timeout_secs: u64,
}

/// Language model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  /// Base URL of an OpenAI-compatible API
  pub base_url:          String,
  /// Bearer token; analysis is skipped when unset
  pub api_key:           Option<String>,
  /// Model used for analysis
  pub model:             String,
  /// Model used for translation
  pub translation_model: String,
  /// Per-request timeout
  pub timeout_secs:      u64,
}

/// Delivery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
  /// HTTP mail relay; deliveries are written to the outbox when unset
  pub relay_url:          Option<String>,
  /// Bearer token for the relay
  pub relay_token:        Option<String>,
  /// Outbox directory, defaulting to `<data_dir>/outbox`
  pub outbox_dir:         Option<PathBuf>,
  /// Sender address
  pub sender:             Option<String>,
  /// Recipients used when a request names none
  pub default_recipients: Vec<String>,
  /// Subject prefix for multi-paper deliveries
  pub subject:            String,
}

/// arXiv search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
  /// arXiv API query endpoint
  pub endpoint:           String,
  /// Categories searched when a query names none
  pub default_categories: Vec<String>,
  /// Maximum number of results per search
  pub limit:              usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      data_dir:          Self::default_data_dir(),
      public_url:        "http://localhost:5001".to_string(),
      prompt_path:       None,
      retries:           2,
      http_timeout_secs: 60,
      parser:            ParserConfig::default(),
      llm:               LlmConfig::default(),
      delivery:          DeliveryConfig::default(),
      search:            SearchConfig::default(),
    }
  }
}

impl Default for ParserConfig {
  fn default() -> Self { Self { url: None, timeout_secs: 120 } }
}

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      base_url:          "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
      api_key:           None,
      model:             "qwen-plus".to_string(),
      translation_model: "qwen-mt-turbo".to_string(),
      timeout_secs:      300,
    }
  }
}

impl Default for DeliveryConfig {
  fn default() -> Self {
    Self {
      relay_url:          None,
      relay_token:        None,
      outbox_dir:         None,
      sender:             None,
      default_recipients: Vec::new(),
      subject:            "ArXiv Daily Papers".to_string(),
    }
  }
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      endpoint:           "http://export.arxiv.org/api/query".to_string(),
      default_categories: ["cs.AI", "cs.CL", "cs.CV", "cs.LG"].map(String::from).to_vec(),
      limit:              300,
    }
  }
}

impl Config {
  /// Returns the default location of the configuration file.
  ///
  /// - On Unix: `~/.config/papermill/config.toml`
  /// - On macOS: `~/Library/Application Support/papermill/config.toml`
  /// - On Windows: `%APPDATA%\papermill\config.toml`
  /// - Fallback: `./papermill/config.toml`
  pub fn default_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("papermill").join("config.toml")
  }

  /// Returns the default data directory, `<platform data dir>/papermill`.
  pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("papermill")
  }

  /// Reads the configuration at `path`.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
      std::io::ErrorKind::NotFound => MillError::Config(format!(
        "No configuration found at {}. Run `papermill init` first.",
        path.display()
      )),
      _ => MillError::Io(e),
    })?;
    let config = toml::from_str(&content)?;
    debug!("Loaded configuration from {path:?}");
    Ok(config)
  }

  /// Writes the configuration to `path`, creating parent directories.
  pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(self)?)?;
    Ok(())
  }

  /// Applies the process environment on top of this configuration.
  pub fn apply_env(self) -> Self { self.apply_vars(|key| std::env::var(key).ok()) }

  /// Applies variables from `lookup` on top of this configuration.
  ///
  /// Empty values are ignored.
  pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(url) = var("PDF_PARSER_URL") {
      self.parser.url = Some(url);
    }
    if let Some(key) = var("DASHSCOPE_API_KEY") {
      self.llm.api_key = Some(key);
    }
    if let Some(url) = var("DASHSCOPE_BASE_URL") {
      self.llm.base_url = url;
    }
    if let Some(url) = var("BACKEND_PUBLIC_URL") {
      self.public_url = url;
    }
    if let Some(sender) = var("SENDER_EMAIL") {
      self.delivery.sender = Some(sender);
    }
    if let Some(recipients) = var("RECIPIENT_EMAILS") {
      self.delivery.default_recipients = recipients
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from)
        .collect();
    }
    if let Some(subject) = var("EMAIL_SUBJECT") {
      self.delivery.subject = subject;
    }
    if let Some(url) = var("MAIL_RELAY_URL") {
      self.delivery.relay_url = Some(url);
    }
    if let Some(token) = var("MAIL_RELAY_TOKEN") {
      self.delivery.relay_token = Some(token);
    }
    self
  }

  /// Sets the data directory.
  pub fn with_data_dir(mut self, data_dir: &Path) -> Self {
    self.data_dir = data_dir.to_path_buf();
    self
  }

  /// Sets the public base URL.
  pub fn with_public_url(mut self, public_url: &str) -> Self {
    self.public_url = public_url.to_string();
    self
  }

  /// Sets the PDF parser endpoint.
  pub fn with_parser_url(mut self, url: &str) -> Self {
    self.parser.url = Some(url.to_string());
    self
  }

  /// Sets the language model API key.
  pub fn with_api_key(mut self, api_key: &str) -> Self {
    self.llm.api_key = Some(api_key.to_string());
    self
  }

  /// Sets the recipients used when a request names none.
  pub fn with_default_recipients(mut self, recipients: &[&str]) -> Self {
    self.delivery.default_recipients = recipients.iter().map(|r| r.to_string()).collect();
    self
  }

  /// Location of the processed-paper history.
  pub fn history_path(&self) -> PathBuf { self.data_dir.join("history.json") }

  /// Root of the artifact store.
  pub fn artifacts_path(&self) -> PathBuf { self.data_dir.join("analysis_results") }

  /// Directory for downloaded PDFs while they are being parsed.
  pub fn scratch_path(&self) -> PathBuf { self.data_dir.join("scratch") }

  /// Directory for server log files.
  pub fn logs_path(&self) -> PathBuf { self.data_dir.join("logs") }

  /// Directory deliveries are spooled to when no relay is configured.
  pub fn outbox_path(&self) -> PathBuf {
    self.delivery.outbox_dir.clone().unwrap_or_else(|| self.data_dir.join("outbox"))
  }

  /// Timeout for downloads, search and delivery requests.
  pub fn http_timeout(&self) -> Duration { Duration::from_secs(self.http_timeout_secs) }

  /// The analysis instructions, read from `prompt_path` or built in.
  pub fn prompt(&self) -> Result<String> {
    match &self.prompt_path {
      Some(path) => Ok(std::fs::read_to_string(path)?),
      None => Ok(DEFAULT_PROMPT.to_string()),
    }
  }
}
