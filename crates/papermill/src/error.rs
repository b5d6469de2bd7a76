//! Error types for the papermill library.
//!
//! Only a handful of operations in this crate surface errors to callers. The analysis pipeline
//! never does: it folds every failure into a diagnostic artifact. The variants below cover the
//! stores, the collaborator clients, delivery and request validation.
//!
//! # Examples
//!
//! ```
//! use papermill::error::MillError;
//!
//! fn describe(err: &MillError) -> &'static str {
//!   match err {
//!     MillError::Conflict(_) => "a job is already running",
//!     MillError::NotFound(_) => "no such artifact",
//!     MillError::Delivery(_) | MillError::NoRecipients => "delivery failed",
//!     _ => "other failure",
//!   }
//! }
//! ```

use thiserror::Error;

/// Error type alias used for the [`papermill`](crate) crate.
pub type Result<T> = core::result::Result<T, MillError>;

/// Errors that can occur when working with the papermill library.
#[derive(Error, Debug)]
pub enum MillError {
  /// A network request failed.
  ///
  /// This covers connection failures, timeouts and TLS errors from any of the HTTP
  /// collaborators (document download, parser, language model, search, mail relay).
  #[error(transparent)]
  Network(#[from] reqwest::Error),

  /// A file system operation failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// JSON serialization or deserialization failed.
  ///
  /// This occurs when the history file or an artifact's metadata is corrupt, or when a
  /// collaborator answers with a body of the wrong shape.
  #[error(transparent)]
  Json(#[from] serde_json::Error),

  /// The configuration file could not be parsed.
  #[error(transparent)]
  TomlDe(#[from] toml::de::Error),

  /// The configuration could not be serialized.
  #[error(transparent)]
  TomlSer(#[from] toml::ser::Error),

  /// Building a zip bundle failed.
  #[error(transparent)]
  Zip(#[from] zip::result::ZipError),

  /// An embedded image was not valid base64.
  #[error(transparent)]
  Base64(#[from] base64::DecodeError),

  /// The arXiv feed could not be parsed.
  #[error(transparent)]
  Xml(#[from] quick_xml::Error),

  /// A collaborator answered with a non-success status or an unusable body.
  ///
  /// The string carries the collaborator's name and the status or reason, for example
  /// `"parser returned 502 Bad Gateway"`.
  #[error("API error: {0}")]
  ApiError(String),

  /// The requested artifact, image or history entry does not exist.
  #[error("Not found: {0}")]
  NotFound(String),

  /// A background job is already running.
  ///
  /// Returned by [`JobTracker::start`](crate::status::JobTracker::start). The tracker is left
  /// untouched; the string is the message of the run that is in progress.
  #[error("A task is already in progress: {0}")]
  Conflict(String),

  /// A request was malformed, such as an empty batch or a blank translation input.
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  /// A model was not specified for the completion request.
  #[error("No model was chosen for the LLM.")]
  LLMMissingModel,

  /// No messages were provided in the completion request.
  #[error("No messages were supplied to send to the LLM.")]
  LLMMissingMessage,

  /// The outbound transport refused or failed to send a delivery.
  #[error("Delivery failed: {0}")]
  Delivery(String),

  /// Neither the request nor the configuration named a valid recipient.
  #[error("No valid recipient address was provided or configured")]
  NoRecipients,

  /// A configuration value is missing or invalid.
  #[error("{0}")]
  Config(String),
}

impl MillError {
  /// Whether retrying the same request could plausibly succeed.
  ///
  /// Timeouts, connection failures and `5xx`/`429` statuses are transient. Everything else is
  /// treated as permanent.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Network(err) =>
        err.is_timeout()
          || err.is_connect()
          || err.status().is_some_and(|status| {
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
          }),
      _ => false,
    }
  }
}
