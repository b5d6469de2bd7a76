//! Title and abstract translation through a completion model.
//!
//! The title and abstract are sent together as `Title: ...\n\nAbstract: ...` and the reply is
//! split back into its two sections. Translation models do not always keep the labels, so the
//! parser falls back to treating a short first line as the title.

use super::*;
use crate::llm::Completion;

/// Placeholder for a reply without a usable title.
pub const NO_TITLE: &str = "(No Title Translation)";
/// Placeholder for a reply without a usable abstract.
pub const NO_ABSTRACT: &str = "(No Abstract Translation)";
/// Title used when nothing could be parsed from the reply.
pub const TRANSLATION_ERROR: &str = "(Translation Error)";

/// Longest first line still treated as a title in unlabeled replies.
const MAX_TITLE_LEN: usize = 100;

/// A translated title and abstract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
  /// Translated title
  pub title:         String,
  /// Translated abstract
  pub abstract_text: String,
}

/// The `translation_options` body field for DashScope's machine translation models.
pub fn translation_options() -> serde_json::Value {
  serde_json::json!({
    "source_lang": "auto",
    "target_lang": "Chinese",
    "domains": "academic paper, computer science, scientific research",
  })
}

/// Translates `title` and `abstract_text` with `completion`.
///
/// # Errors
///
/// [`MillError::InvalidRequest`] when either input is blank, otherwise whatever the completion
/// call fails with.
pub async fn translate(
  completion: &dyn Completion,
  title: &str,
  abstract_text: &str,
) -> Result<Translation> {
  if title.trim().is_empty() || abstract_text.trim().is_empty() {
    return Err(MillError::InvalidRequest("Title and abstract are required.".to_string()));
  }
  let reply = completion.complete(&format!("Title: {title}\n\nAbstract: {abstract_text}")).await?;
  trace!("Translation reply: {reply}");
  Ok(parse_reply(&reply))
}

/// Splits a translation reply into title and abstract.
pub fn parse_reply(reply: &str) -> Translation {
  lazy_static! {
    static ref TITLE: Regex = Regex::new(r"(?is)Title:(.*?)(?:\n\nAbstract:|$)").unwrap();
    static ref ABSTRACT: Regex = Regex::new(r"(?is)Abstract:(.*)").unwrap();
  }

  let mut title = TITLE.captures(reply).map(|c| strip_label(c[1].trim())).unwrap_or_default();
  let mut abstract_text =
    ABSTRACT.captures(reply).map(|c| strip_label(c[1].trim())).unwrap_or_default();

  if title.is_empty() && abstract_text.is_empty() {
    abstract_text = reply.trim().to_string();
    let first_line = reply.trim().lines().next().unwrap_or_default().trim();
    let lower = first_line.to_lowercase();
    if first_line.chars().count() < MAX_TITLE_LEN
      && !lower.starts_with("abstract")
      && !lower.starts_with("summary")
    {
      title = strip_label(first_line);
      if !title.is_empty() {
        abstract_text = reply.trim().replacen(first_line, "", 1).trim().to_string();
      }
    }
  }

  let title = strip_label(&title);
  let abstract_text = strip_label(&abstract_text);
  match (title.is_empty(), abstract_text.is_empty()) {
    (true, true) => {
      warn!("Could not parse translation reply");
      Translation { title: TRANSLATION_ERROR.to_string(), abstract_text: reply.trim().to_string() }
    },
    (true, false) => Translation { title: NO_TITLE.to_string(), abstract_text },
    (false, true) => Translation { title, abstract_text: NO_ABSTRACT.to_string() },
    (false, false) => Translation { title, abstract_text },
  }
}

/// Removes a leading `Title:`/`Abstract:` label, optionally preceded by `Translated:`.
fn strip_label(text: &str) -> String {
  lazy_static! {
    static ref LABEL: Regex = Regex::new(r"(?i)^(?:Translated:\s*)?(?:Title|Abstract):?\s*").unwrap();
  }
  LABEL.replace(text.trim(), "").trim().to_string()
}
