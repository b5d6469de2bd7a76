//! The figure gallery manifest appended to rendered documents.
//!
//! When a paper yields extracted images, the assembled document ends with an HTML comment that
//! lists them:
//!
//! ```text
//! <!-- FIGURES_GALLERY_DATA: [{"src":"http://host/api/images/2401.01234v1/fig1.png","alt":"fig1.png"}] -->
//! ```
//!
//! Markdown renderers ignore the comment. The web frontend looks for it to build an image
//! carousel. Consumers must treat it as optional.

use super::*;

/// Opening marker of the manifest comment.
const MARKER: &str = "<!-- FIGURES_GALLERY_DATA: ";
/// Closing marker of the manifest comment.
const TERMINATOR: &str = " -->";

/// One figure in the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryImage {
  /// Absolute URL the image is served from
  #[serde(rename = "src")]
  pub url: String,
  /// Alternative text, the image's filename
  pub alt: String,
}

/// Renders the manifest block, including its leading blank line.
///
/// Returns an empty string for an empty gallery.
pub fn render(images: &[GalleryImage]) -> Result<String> {
  if images.is_empty() {
    return Ok(String::new());
  }
  Ok(format!("\n\n{MARKER}{}{TERMINATOR}", serde_json::to_string(images)?))
}

/// Parses the manifest back out of a rendered document.
///
/// A document without a manifest, or with one that does not parse, yields an empty list.
pub fn extract(document: &str) -> Vec<GalleryImage> {
  let Some(start) = document.rfind(MARKER) else {
    return Vec::new();
  };
  let body = &document[start + MARKER.len()..];
  let Some(end) = body.find(TERMINATOR) else {
    return Vec::new();
  };
  serde_json::from_str(&body[..end]).unwrap_or_else(|e| {
    warn!("Ignoring malformed gallery manifest: {e}");
    Vec::new()
  })
}
