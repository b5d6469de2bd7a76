//! Packaging analyses into a single delivery and handing it to a transport.
//!
//! One paper is delivered as a single markdown attachment named after its title. Several papers
//! are bundled into `arxiv_papers_<date>.zip`. The [`Courier`] resolves recipients and writes
//! the subject and body, and a [`Transport`] moves the finished [`Delivery`]:
//!
//! - [`OutboxTransport`] writes each delivery into its own directory under the outbox
//! - [`RelayTransport`] posts it to an HTTP mail relay
//!
//! Every transport failure surfaces as [`MillError::Delivery`] so callers can tell delivery
//! problems apart from analysis problems.

use std::{
  io::Write,
  sync::atomic::{AtomicU64, Ordering},
};

use reqwest::multipart::{Form, Part};

use super::*;
use crate::{config::DeliveryConfig, store::Artifact};

/// A file attached to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
  /// Name the recipient sees
  pub filename:     String,
  /// MIME type
  pub content_type: String,
  /// File contents
  pub bytes:        Vec<u8>,
}

/// A complete outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
  /// Subject line
  pub subject:    String,
  /// Plain-text body
  pub body:       String,
  /// Addresses the message goes to
  pub recipients: Vec<String>,
  /// The single attachment
  pub attachment: Attachment,
}

/// Something that can send a [`Delivery`].
#[async_trait]
pub trait Transport: Send + Sync {
  /// Sends `delivery`, returning once the transport has accepted it.
  async fn deliver(&self, delivery: &Delivery) -> Result<()>;
}

/// Packages the documents of `artifacts` into one attachment.
///
/// A single artifact becomes `<sanitized title>.md`. Several become a deflate-compressed zip
/// named after `date`, with ` (2)`, ` (3)`, ... appended to colliding names.
pub fn package(artifacts: &[Artifact], date: NaiveDate) -> Result<Attachment> {
  match artifacts {
    [] => Err(MillError::InvalidRequest("nothing to deliver".to_string())),
    [artifact] => Ok(Attachment {
      filename:     artifact.paper().attachment_name(),
      content_type: "text/markdown".to_string(),
      bytes:        artifact.document.as_bytes().to_vec(),
    }),
    artifacts => {
      let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
      let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
      let mut taken: Vec<String> = Vec::with_capacity(artifacts.len());
      for artifact in artifacts {
        let name = unique_name(&artifact.paper().attachment_name(), &taken);
        writer.start_file(name.as_str(), options)?;
        writer.write_all(artifact.document.as_bytes())?;
        taken.push(name);
      }
      let bytes = writer.finish()?.into_inner();
      debug!("Bundled {} documents into {} bytes", artifacts.len(), bytes.len());
      Ok(Attachment {
        filename: format!("arxiv_papers_{}.zip", date.format("%Y-%m-%d")),
        content_type: "application/zip".to_string(),
        bytes,
      })
    },
  }
}

/// `name`, or `name` with a ` (n)` suffix before its extension if it is already taken.
fn unique_name(name: &str, taken: &[String]) -> String {
  if !taken.iter().any(|t| t == name) {
    return name.to_string();
  }
  let (stem, ext) = match name.rsplit_once('.') {
    Some((stem, ext)) => (stem, format!(".{ext}")),
    None => (name, String::new()),
  };
  (2..)
    .map(|n| format!("{stem} ({n}){ext}"))
    .find(|candidate| !taken.iter().any(|t| t == candidate))
    .unwrap_or_else(|| name.to_string())
}

/// Whether `address` looks like an email address.
pub fn is_valid_recipient(address: &str) -> bool {
  lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap();
  }
  EMAIL.is_match(address)
}

/// Picks the recipients for a delivery.
///
/// A valid `requested` address wins. Otherwise the non-empty entries of `defaults` are used.
pub fn resolve_recipients(requested: Option<&str>, defaults: &[String]) -> Result<Vec<String>> {
  if let Some(requested) = requested.map(str::trim).filter(|r| !r.is_empty()) {
    if is_valid_recipient(requested) {
      return Ok(vec![requested.to_string()]);
    }
    warn!("Ignoring invalid recipient {requested:?}, using the configured recipients");
  }
  let defaults: Vec<String> =
    defaults.iter().map(|r| r.trim().to_string()).filter(|r| !r.is_empty()).collect();
  if defaults.is_empty() {
    return Err(MillError::NoRecipients);
  }
  Ok(defaults)
}

/// Composes deliveries and hands them to a [`Transport`].
#[derive(Clone)]
pub struct Courier {
  /// Where deliveries go
  transport:          Arc<dyn Transport>,
  /// Subject prefix for bundles
  subject:            String,
  /// Recipients used when a request names none
  default_recipients: Vec<String>,
}

impl Courier {
  /// Creates a courier using the subject and recipients in `config`.
  pub fn new(transport: Arc<dyn Transport>, config: &DeliveryConfig) -> Self {
    Self {
      transport,
      subject: config.subject.clone(),
      default_recipients: config.default_recipients.clone(),
    }
  }

  /// Builds the delivery for `artifacts` without sending it.
  pub fn compose(
    &self,
    artifacts: &[Artifact],
    recipient: Option<&str>,
    date: NaiveDate,
  ) -> Result<Delivery> {
    let recipients = resolve_recipients(recipient, &self.default_recipients)?;
    let attachment = package(artifacts, date)?;
    let (subject, body) = match artifacts {
      [artifact] => {
        (artifact.paper().title.clone(), "Attached is your requested paper analysis.".to_string())
      },
      _ => (
        format!("{} - {} new papers", self.subject, artifacts.len()),
        format!("Attached are {} new papers from your arXiv subscriptions.", artifacts.len()),
      ),
    };
    Ok(Delivery { subject, body, recipients, attachment })
  }

  /// Packages `artifacts` and sends them to `recipient` or the configured recipients.
  ///
  /// # Errors
  ///
  /// [`MillError::NoRecipients`] when nobody can receive the delivery, [`MillError::Delivery`]
  /// when the transport fails.
  pub async fn deliver(&self, artifacts: &[Artifact], recipient: Option<&str>) -> Result<()> {
    let delivery = self.compose(artifacts, recipient, Utc::now().date_naive())?;
    info!(
      "Delivering {} ({} bytes) to {}",
      delivery.attachment.filename,
      delivery.attachment.bytes.len(),
      delivery.recipients.join(", ")
    );
    self.transport.deliver(&delivery).await.map_err(|e| match e {
      MillError::Delivery(_) | MillError::NoRecipients => e,
      other => MillError::Delivery(other.to_string()),
    })
  }
}

/// Builds the courier described by `config`: a relay when one is configured, otherwise the
/// outbox.
pub fn from_config(config: &Config) -> Result<Courier> {
  let transport: Arc<dyn Transport> = match &config.delivery.relay_url {
    Some(url) => Arc::new(RelayTransport::new(
      url,
      config.delivery.relay_token.as_deref(),
      config.delivery.sender.as_deref(),
      config.http_timeout(),
      config.retries,
    )?),
    None => {
      let outbox = config.outbox_path();
      info!("No mail relay configured, deliveries go to {}", outbox.display());
      Arc::new(OutboxTransport::new(outbox).with_sender(config.delivery.sender.as_deref()))
    },
  };
  Ok(Courier::new(transport, &config.delivery))
}

/// Envelope written next to each outbox attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
  /// Sender, if configured
  pub from:       Option<String>,
  /// Recipients
  pub to:         Vec<String>,
  /// Subject line
  pub subject:    String,
  /// Plain-text body
  pub body:       String,
  /// File name of the attachment in the same directory
  pub attachment: String,
  /// When the delivery was written
  pub sent_at:    DateTime<Utc>,
}

/// Transport that writes each delivery to `<outbox>/<timestamp>-<n>/`.
#[derive(Debug, Clone)]
pub struct OutboxTransport {
  /// Outbox directory
  dir:    PathBuf,
  /// Sender recorded in envelopes
  sender: Option<String>,
}

impl OutboxTransport {
  /// Creates an outbox at `dir`. The directory is created on first delivery.
  pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into(), sender: None } }

  /// Records `sender` in every envelope.
  pub fn with_sender(mut self, sender: Option<&str>) -> Self {
    self.sender = sender.map(str::to_string);
    self
  }

  /// The outbox directory.
  pub fn dir(&self) -> &Path { &self.dir }
}

#[async_trait]
impl Transport for OutboxTransport {
  async fn deliver(&self, delivery: &Delivery) -> Result<()> {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let sent_at = Utc::now();
    let name = format!(
      "{}-{}-{}",
      sent_at.format("%Y%m%dT%H%M%S%.6f"),
      std::process::id(),
      NEXT.fetch_add(1, Ordering::Relaxed)
    );
    let dir = self.dir.join(name);
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join(&delivery.attachment.filename), &delivery.attachment.bytes).await?;

    let envelope = Envelope {
      from: self.sender.clone(),
      to: delivery.recipients.clone(),
      subject: delivery.subject.clone(),
      body: delivery.body.clone(),
      attachment: delivery.attachment.filename.clone(),
      sent_at,
    };
    tokio::fs::write(dir.join("envelope.json"), serde_json::to_vec_pretty(&envelope)?).await?;
    info!("Wrote delivery to {}", dir.display());
    Ok(())
  }
}

/// Transport that posts each delivery to an HTTP mail relay as a multipart form.
#[derive(Debug, Clone)]
pub struct RelayTransport {
  /// Relay endpoint
  url:     Url,
  /// Optional bearer token
  token:   Option<String>,
  /// Optional `from` field
  sender:  Option<String>,
  /// Client with the configured timeout
  client:  reqwest::Client,
  /// Extra attempts for transient failures
  retries: u32,
}

impl RelayTransport {
  /// Creates a relay client posting to `url`.
  pub fn new(
    url: &str,
    token: Option<&str>,
    sender: Option<&str>,
    timeout: Duration,
    retries: u32,
  ) -> Result<Self> {
    let url = Url::parse(url)
      .map_err(|e| MillError::Config(format!("invalid mail relay URL {url:?}: {e}")))?;
    Ok(Self {
      url,
      token: token.map(str::to_string),
      sender: sender.map(str::to_string),
      client: retry::client(timeout)?,
      retries,
    })
  }

  /// Builds the multipart form for one attempt.
  fn form(&self, delivery: &Delivery) -> Result<Form> {
    let attachment = Part::bytes(delivery.attachment.bytes.clone())
      .file_name(delivery.attachment.filename.clone())
      .mime_str(&delivery.attachment.content_type)?;
    let mut form = Form::new()
      .text("to", delivery.recipients.join(","))
      .text("subject", delivery.subject.clone())
      .text("text", delivery.body.clone())
      .part("attachment", attachment);
    if let Some(sender) = &self.sender {
      form = form.text("from", sender.clone());
    }
    Ok(form)
  }
}

#[async_trait]
impl Transport for RelayTransport {
  async fn deliver(&self, delivery: &Delivery) -> Result<()> {
    retry::with_backoff("mail relay", self.retries, || async move {
      let mut request = self.client.post(self.url.clone()).multipart(self.form(delivery)?);
      if let Some(token) = &self.token {
        request = request.bearer_auth(token);
      }
      request.send().await?.error_for_status()?;
      Ok(())
    })
    .await
    .map_err(|e| MillError::Delivery(format!("mail relay rejected delivery: {e}")))
  }
}
