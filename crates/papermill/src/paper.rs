//! The paper record shared by every boundary of the pipeline.
//!
//! A [`Paper`] is created once by the search client (or posted by a client as JSON) and is only
//! ever read afterwards. The JSON shape matches what the web frontend sends back when it asks for
//! an analysis:
//!
//! ```json
//! {
//!   "entry_id": "http://arxiv.org/abs/2401.01234v1",
//!   "title": "A Paper",
//!   "summary": "...",
//!   "authors": ["Alice", "Bob"],
//!   "pdf_url": "http://arxiv.org/pdf/2401.01234v1",
//!   "published": "2024-01-02T00:00:00Z",
//!   "categories": ["cs.AI"]
//! }
//! ```

use super::*;

/// Complete representation of a paper as returned by the search feed.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use papermill::paper::Paper;
///
/// let paper = Paper::new("http://arxiv.org/abs/2401.01234v1", "Attention Is Enough")
///   .with_author("Alice Researcher")
///   .with_category("cs.AI")
///   .with_pdf_url("http://arxiv.org/pdf/2401.01234v1")
///   .with_published(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
///
/// assert_eq!(paper.short_id(), "2401.01234v1");
/// assert_eq!(paper.attachment_name(), "Attention Is Enough.md");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
  /// Globally unique identifier, stable across re-fetches (the arXiv abs URL)
  pub entry_id:   String,
  /// The paper's full title
  pub title:      String,
  /// Abstract text, empty when the source did not provide one
  #[serde(default)]
  pub summary:    String,
  /// Author names in publication order
  #[serde(default)]
  pub authors:    Vec<String>,
  /// URL of the full-text PDF
  #[serde(default)]
  pub pdf_url:    Option<String>,
  /// Publication timestamp
  pub published:  DateTime<Utc>,
  /// Category tags in feed order, without duplicates
  #[serde(default)]
  pub categories: Vec<String>,
}

impl Paper {
  /// Creates a paper with only an identifier and a title.
  ///
  /// The publication timestamp defaults to now. Use the `with_*` methods to fill in the rest.
  pub fn new(entry_id: &str, title: &str) -> Self {
    Self {
      entry_id:   entry_id.to_string(),
      title:      title.to_string(),
      summary:    String::new(),
      authors:    Vec::new(),
      pdf_url:    None,
      published:  Utc::now(),
      categories: Vec::new(),
    }
  }

  /// Sets the abstract.
  pub fn with_summary(mut self, summary: &str) -> Self {
    self.summary = summary.to_string();
    self
  }

  /// Appends an author.
  pub fn with_author(mut self, name: &str) -> Self {
    self.authors.push(name.to_string());
    self
  }

  /// Appends a category tag, ignoring duplicates.
  pub fn with_category(mut self, category: &str) -> Self {
    if !self.categories.iter().any(|c| c == category) {
      self.categories.push(category.to_string());
    }
    self
  }

  /// Sets the PDF URL.
  pub fn with_pdf_url(mut self, url: &str) -> Self {
    self.pdf_url = Some(url.to_string());
    self
  }

  /// Sets the publication timestamp.
  pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
    self.published = published;
    self
  }

  /// The trailing path segment of [`Paper::entry_id`].
  ///
  /// This is the key for the paper's artifact directory and for its image URLs. Trailing
  /// slashes are ignored, and an identifier with no `/` is returned as is.
  pub fn short_id(&self) -> &str { short_id(&self.entry_id) }

  /// Filename for the paper's analysis when it is delivered on its own.
  ///
  /// Characters that are not allowed in filenames on common platforms are removed. An empty
  /// result falls back to the short identifier.
  pub fn attachment_name(&self) -> String {
    lazy_static! {
      static ref UNSAFE: Regex = Regex::new(r#"[\\/*?:"<>|]"#).unwrap();
    }
    let cleaned = UNSAFE.replace_all(&self.title, "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
      format!("{}.md", self.short_id())
    } else {
      format!("{cleaned}.md")
    }
  }
}

impl Display for Paper {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} ({})", self.title, self.short_id())
  }
}

/// The trailing path segment of a full paper identifier.
pub fn short_id(entry_id: &str) -> &str {
  let trimmed = entry_id.trim_end_matches('/');
  trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_short_id() {
    assert_eq!(short_id("http://arxiv.org/abs/2401.01234v1"), "2401.01234v1");
    assert_eq!(short_id("http://arxiv.org/abs/2401.01234v1/"), "2401.01234v1");
    assert_eq!(short_id("2401.01234"), "2401.01234");
  }

  #[test]
  fn test_attachment_name_strips_unsafe_characters() {
    let paper = Paper::new("http://arxiv.org/abs/1", "What? A <Paper>: \"Part\" 1/2 | Notes*");
    assert_eq!(paper.attachment_name(), "What A Paper Part 12 Notes.md");
  }

  #[test]
  fn test_attachment_name_falls_back_to_short_id() {
    let paper = Paper::new("http://arxiv.org/abs/2401.00001v2", "???");
    assert_eq!(paper.attachment_name(), "2401.00001v2.md");
  }

  #[test]
  fn test_categories_deduplicated() {
    let paper = Paper::new("id", "t").with_category("cs.AI").with_category("cs.AI");
    assert_eq!(paper.categories, vec!["cs.AI"]);
  }

  #[test]
  fn test_deserialize_frontend_shape() {
    let json = r#"{
      "entry_id": "http://arxiv.org/abs/2401.01234v1",
      "title": "A Paper",
      "summary": "Abstract.",
      "authors": ["Alice", "Bob"],
      "pdf_url": "http://arxiv.org/pdf/2401.01234v1",
      "published": "2024-01-02T00:00:00+00:00",
      "categories": ["cs.AI", "cs.LG"]
    }"#;
    let paper: Paper = serde_json::from_str(json).unwrap();
    assert_eq!(paper.short_id(), "2401.01234v1");
    assert_eq!(paper.authors, vec!["Alice", "Bob"]);
    assert_eq!(paper.published.to_rfc3339(), "2024-01-02T00:00:00+00:00");
  }

  #[test]
  fn test_deserialize_minimal() {
    let json = r#"{"entry_id": "x/1", "title": "T", "published": "2024-01-02T00:00:00Z"}"#;
    let paper: Paper = serde_json::from_str(json).unwrap();
    assert!(paper.pdf_url.is_none());
    assert!(paper.authors.is_empty());
  }
}
