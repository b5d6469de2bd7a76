//! Client for the PDF-to-markdown parsing service.
//!
//! The service accepts a multipart upload with the PDF under the `files` field and the form
//! flags `return_md=true` and `return_images=true`. It answers with one result per uploaded
//! file:
//!
//! ```json
//! {
//!   "results": {
//!     "2401.01234v1": {
//!       "md_content": "# Title\n\n![](images/fig1.png)\n...",
//!       "images": { "fig1.png": "data:image/png;base64,iVBORw0..." }
//!     }
//!   }
//! }
//! ```

use reqwest::multipart::{Form, Part};

use super::*;

/// Structured text and embedded images extracted from a PDF.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ParsedDocument {
  /// Full text as markdown, referencing images as `images/<filename>`
  #[serde(default, rename = "md_content")]
  pub markdown: String,
  /// Embedded images keyed by filename, each a `data:` URI
  #[serde(default)]
  pub images:   BTreeMap<String, String>,
}

/// Envelope returned by the parsing service.
#[derive(Debug, Deserialize)]
struct ParseResponse {
  /// One entry per uploaded file
  #[serde(default)]
  results: BTreeMap<String, ParsedDocument>,
}

/// Something that can turn a PDF into markdown and images.
#[async_trait]
pub trait DocumentParser: Send + Sync {
  /// Parses the PDF stored at `pdf`.
  async fn parse(&self, pdf: &Path) -> Result<ParsedDocument>;
}

/// Parser backed by a remote HTTP service.
#[derive(Debug, Clone)]
pub struct HttpParser {
  /// Endpoint the PDF is posted to
  url:     Url,
  /// Client with the configured timeout
  client:  reqwest::Client,
  /// Extra attempts for transient failures
  retries: u32,
}

impl HttpParser {
  /// Creates a client posting to `url`.
  pub fn new(url: &str, timeout: Duration, retries: u32) -> Result<Self> {
    let url = Url::parse(url)
      .map_err(|e| MillError::Config(format!("invalid PDF parser URL {url:?}: {e}")))?;
    Ok(Self { url, client: retry::client(timeout)?, retries })
  }
}

#[async_trait]
impl DocumentParser for HttpParser {
  async fn parse(&self, pdf: &Path) -> Result<ParsedDocument> {
    let bytes = tokio::fs::read(pdf).await?;
    let filename =
      pdf.file_name().and_then(|n| n.to_str()).unwrap_or("document.pdf").to_string();

    let response: ParseResponse = retry::with_backoff("PDF parse", self.retries, || {
      let bytes = bytes.clone();
      let filename = filename.clone();
      async move {
        let part = Part::bytes(bytes).file_name(filename).mime_str("application/pdf")?;
        let form = Form::new()
          .part("files", part)
          .text("return_md", "true")
          .text("return_images", "true");
        let response = self.client.post(self.url.clone()).multipart(form).send().await?;
        Ok(response.error_for_status()?.json().await?)
      }
    })
    .await?;

    first_result(response)
  }
}

/// Picks the first (and normally only) result from a parser response.
fn first_result(response: ParseResponse) -> Result<ParsedDocument> {
  response
    .results
    .into_values()
    .next()
    .ok_or_else(|| MillError::ApiError("parser returned no results".to_string()))
}

/// Decodes a `data:<mime>;base64,<payload>` URI into raw bytes.
///
/// A bare base64 payload without the `data:` header is accepted as well.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
  use base64::{engine::general_purpose::STANDARD, Engine as _};

  let payload = match uri.split_once(',') {
    Some((header, payload)) if header.starts_with("data:") => payload,
    Some(_) => return Err(MillError::InvalidRequest("malformed data URI".to_string())),
    None => uri,
  };
  Ok(STANDARD.decode(payload.trim())?)
}
