//! The single-paper analysis pipeline.
//!
//! [`Analyzer::analyze`] turns a [`Paper`] into an [`Artifact`]:
//!
//! 1. Return the stored artifact if the paper was already analyzed and delivered.
//! 2. Download the PDF into a scratch file that is deleted on every exit path.
//! 3. Parse it into markdown and images, saving the images into a draft as they are decoded.
//! 4. Ask the language model for an analysis of the full text.
//! 5. Point relative image references at the image endpoint and assemble the document.
//! 6. Commit the draft to the [`ArtifactStore`].
//!
//! The pipeline never returns an error. Any failure before step 6 yields a diagnostic artifact
//! whose document is a bracketed placeholder such as `[Analysis Failed: Paper has no PDF URL]`.
//! Diagnostic artifacts are not persisted, so the next request tries again. A failure in step
//! 6 is logged and the freshly built artifact is returned anyway.

use thiserror::Error;

use super::*;
use crate::{
  download::{DocumentSource, StagedFile},
  gallery::GalleryImage,
  llm::Completion,
  parser::DocumentParser,
  store::{Artifact, ArtifactDraft, ArtifactMetadata, Outcome},
};

/// Sentence joining the analysis instructions to the paper text.
const FULL_TEXT_INSTRUCTION: &str =
  "Based on the requirements above, analyze the full text of the following paper:\n\n";

/// Reasons an analysis ends in a diagnostic artifact. The `Display` form is the placeholder
/// document.
#[derive(Error, Debug)]
enum Failure {
  /// No parser endpoint configured
  #[error("[Analysis Failed: PDF parser URL not configured]")]
  NoParser,
  /// No language model credentials configured
  #[error("[Analysis Skipped: API client not initialized]")]
  NoCompletion,
  /// The paper has no PDF link
  #[error("[Analysis Failed: Paper has no PDF URL]")]
  NoPdfUrl,
  /// Downloading the PDF failed
  #[error("[Analysis Failed: could not download PDF: {0}]")]
  Download(MillError),
  /// The parser failed or answered with something unusable
  #[error("[Analysis Failed: PDF parsing failed: {0}]")]
  Parse(MillError),
  /// The parser produced no text
  #[error("[Analysis Failed: Markdown content was empty after parsing]")]
  EmptyMarkdown,
  /// The language model call failed
  #[error("[Analysis Failed: language model request failed: {0}]")]
  Completion(MillError),
  /// The language model produced no text
  #[error("[Analysis Failed: language model returned an empty response]")]
  EmptyAnalysis,
  /// Anything else
  #[error("[Analysis Failed due to an error: {0}]")]
  Other(MillError),
}

/// Runs the analysis pipeline for one paper at a time.
///
/// Build one with [`Analyzer::builder`]. The parser and completion collaborators are optional:
/// when either is missing every analysis ends in a diagnostic explaining what is not configured.
pub struct Analyzer {
  /// Fetches PDFs
  source:      Arc<dyn DocumentSource>,
  /// Converts PDFs to markdown and images
  parser:      Option<Arc<dyn DocumentParser>>,
  /// Writes the analysis
  completion:  Option<Arc<dyn Completion>>,
  /// Where artifacts are cached
  store:       Arc<ArtifactStore>,
  /// Base URL image references are rewritten to, without a trailing slash
  public_url:  String,
  /// Analysis instructions
  prompt:      String,
  /// Where PDFs are downloaded while they are parsed
  scratch_dir: PathBuf,
}

/// Builder for [`Analyzer`].
#[derive(Default)]
pub struct AnalyzerBuilder {
  /// See [`Analyzer`]
  source:      Option<Arc<dyn DocumentSource>>,
  /// See [`Analyzer`]
  parser:      Option<Arc<dyn DocumentParser>>,
  /// See [`Analyzer`]
  completion:  Option<Arc<dyn Completion>>,
  /// See [`Analyzer`]
  store:       Option<Arc<ArtifactStore>>,
  /// See [`Analyzer`]
  public_url:  Option<String>,
  /// See [`Analyzer`]
  prompt:      Option<String>,
  /// See [`Analyzer`]
  scratch_dir: Option<PathBuf>,
}

impl AnalyzerBuilder {
  /// Sets the document source. Required.
  pub fn with_source(mut self, source: Arc<dyn DocumentSource>) -> Self {
    self.source = Some(source);
    self
  }

  /// Sets the parser, or `None` for an unconfigured parser.
  pub fn with_parser(mut self, parser: Option<Arc<dyn DocumentParser>>) -> Self {
    self.parser = parser;
    self
  }

  /// Sets the completion client, or `None` for missing credentials.
  pub fn with_completion(mut self, completion: Option<Arc<dyn Completion>>) -> Self {
    self.completion = completion;
    self
  }

  /// Sets the artifact store. Required.
  pub fn with_store(mut self, store: Arc<ArtifactStore>) -> Self {
    self.store = Some(store);
    self
  }

  /// Sets the base URL for rewritten image links. Defaults to `http://localhost:5001`.
  pub fn with_public_url(mut self, public_url: &str) -> Self {
    self.public_url = Some(public_url.trim_end_matches('/').to_string());
    self
  }

  /// Sets the analysis instructions. Defaults to the built-in prompt.
  pub fn with_prompt(mut self, prompt: String) -> Self {
    self.prompt = Some(prompt);
    self
  }

  /// Sets the scratch directory. Defaults to `<tmp>/papermill`.
  pub fn with_scratch_dir(mut self, scratch_dir: PathBuf) -> Self {
    self.scratch_dir = Some(scratch_dir);
    self
  }

  /// Builds the analyzer.
  pub fn build(self) -> Result<Analyzer> {
    let source =
      self.source.ok_or_else(|| MillError::Config("analyzer needs a document source".into()))?;
    let store =
      self.store.ok_or_else(|| MillError::Config("analyzer needs an artifact store".into()))?;
    let prompt = match self.prompt {
      Some(prompt) => prompt,
      None => Config::default().prompt()?,
    };
    Ok(Analyzer {
      source,
      parser: self.parser,
      completion: self.completion,
      store,
      public_url: self.public_url.unwrap_or_else(|| "http://localhost:5001".to_string()),
      prompt,
      scratch_dir: self.scratch_dir.unwrap_or_else(|| std::env::temp_dir().join("papermill")),
    })
  }
}

impl Analyzer {
  /// Starts building an analyzer.
  pub fn builder() -> AnalyzerBuilder { AnalyzerBuilder::default() }

  /// The store artifacts are cached in.
  pub fn store(&self) -> &Arc<ArtifactStore> { &self.store }

  /// Analyzes `paper`, reporting phase changes to `progress`.
  ///
  /// A paper that already has a stored artifact and a history entry is returned from the
  /// store without calling any collaborator.
  pub async fn analyze(&self, paper: &Paper, progress: &dyn ProgressSink) -> Artifact {
    let short_id = paper.short_id();
    if self.store.exists(short_id).await && self.store.history().contains(&paper.entry_id).await {
      match self.store.read(short_id).await {
        Ok(artifact) => {
          info!("Cache hit for {short_id}");
          return artifact;
        },
        Err(e) => warn!("Cached artifact for {short_id} is unreadable, re-analyzing: {e}"),
      }
    }

    info!("Cache miss for {short_id}, starting full analysis");
    match self.run(paper, progress).await {
      Ok(artifact) => artifact,
      Err(failure) => {
        warn!("Analysis of {short_id} failed: {failure}");
        Artifact::diagnostic(paper, failure.to_string())
      },
    }
  }

  /// Every step after the cache check.
  async fn run(
    &self,
    paper: &Paper,
    progress: &dyn ProgressSink,
  ) -> std::result::Result<Artifact, Failure> {
    let parser = self.parser.as_ref().ok_or(Failure::NoParser)?;
    let completion = self.completion.as_ref().ok_or(Failure::NoCompletion)?;
    let pdf_url =
      paper.pdf_url.as_deref().filter(|url| !url.trim().is_empty()).ok_or(Failure::NoPdfUrl)?;
    let short_id = paper.short_id();

    progress.report(&format!("Downloading PDF: {}...", truncate(&paper.title, 30)));
    tokio::fs::create_dir_all(&self.scratch_dir).await.map_err(|e| Failure::Other(e.into()))?;
    let pdf = StagedFile::new(self.scratch_dir.join(format!("{short_id}.pdf")));
    self.source.fetch(pdf_url, pdf.path()).await.map_err(Failure::Download)?;

    progress.report("Parsing PDF with image extraction...");
    let parsed = parser.parse(pdf.path()).await.map_err(Failure::Parse)?;
    drop(pdf);
    if parsed.markdown.trim().is_empty() {
      return Err(Failure::EmptyMarkdown);
    }

    let mut draft = match self.store.begin(short_id).await {
      Ok(draft) => Some(draft),
      Err(e) => {
        error!("Could not stage artifact for {short_id}, images will be skipped: {e}");
        None
      },
    };
    if let Some(draft) = &mut draft {
      if let Err(e) = draft.save_raw(&parsed.markdown).await {
        warn!("Could not save raw content for {short_id}: {e}");
      }
      save_images(draft, &parsed.images).await;
    }
    let images = draft.as_ref().map(|d| d.images().to_vec()).unwrap_or_default();

    progress.report("Analyzing full text with LLM...");
    let prompt = format!("{}\n\n---\n\n{FULL_TEXT_INSTRUCTION}{}", self.prompt, parsed.markdown);
    let analysis = completion.complete(&prompt).await.map_err(Failure::Completion)?;
    if analysis.trim().is_empty() {
      return Err(Failure::EmptyAnalysis);
    }

    let body = rewrite_image_refs(&analysis, &self.public_url, short_id, &images);
    let gallery: Vec<GalleryImage> = images
      .iter()
      .map(|name| GalleryImage { url: self.image_url(short_id, name), alt: name.clone() })
      .collect();
    let document = assemble(paper, &body, &gallery).map_err(Failure::Other)?;
    let metadata = ArtifactMetadata {
      paper:                     paper.clone(),
      extracted_image_filenames: images,
      analyzed_at:               Utc::now(),
    };

    Ok(self.persist(draft, document, metadata).await)
  }

  /// Commits the draft, falling back to an unpersisted artifact when that fails.
  async fn persist(
    &self,
    draft: Option<ArtifactDraft>,
    document: String,
    metadata: ArtifactMetadata,
  ) -> Artifact {
    if let Some(draft) = draft {
      match self.store.write(draft, &document, &metadata).await {
        Ok(artifact) => return artifact,
        Err(e) => error!("Failed to persist analysis for {}: {e}", metadata.paper.short_id()),
      }
    }
    Artifact { document, metadata, outcome: Outcome::Analyzed }
  }

  /// Absolute URL of an extracted image.
  fn image_url(&self, short_id: &str, filename: &str) -> String {
    image_url(&self.public_url, short_id, filename)
  }
}

/// Decodes and saves every image, logging and skipping the ones that fail.
async fn save_images(draft: &mut ArtifactDraft, images: &BTreeMap<String, String>) {
  for (filename, uri) in images {
    let saved = match parser::decode_data_uri(uri) {
      Ok(bytes) => draft.save_image(filename, &bytes).await,
      Err(e) => Err(e),
    };
    if let Err(e) = saved {
      warn!("Could not save image {filename} for {}: {e}", draft.short_id());
    }
  }
  debug!("Saved {}/{} images for {}", draft.images().len(), images.len(), draft.short_id());
}

/// Absolute URL of an extracted image served by the image endpoint.
fn image_url(public_url: &str, short_id: &str, filename: &str) -> String {
  format!("{public_url}/api/images/{short_id}/{filename}")
}

/// Rewrites `![alt](images/<file>)` references to absolute image URLs.
///
/// Only references to files in `images` are rewritten. References to images that were not
/// extracted, and relative references of any other shape, are left as they are and logged.
pub fn rewrite_image_refs(text: &str, public_url: &str, short_id: &str, images: &[String]) -> String {
  lazy_static! {
    static ref LOCAL_IMAGE: Regex = Regex::new(r"!\[([^\]]*)\]\(images/([^)\s]+)\)").unwrap();
    static ref ANY_IMAGE: Regex = Regex::new(r"!\[[^\]]*\]\(([^)\s]*)").unwrap();
  }

  let rewritten = LOCAL_IMAGE.replace_all(text, |caps: &regex::Captures| {
    let (alt, filename) = (&caps[1], &caps[2]);
    if images.iter().any(|name| name == filename) {
      format!("![{alt}]({})", image_url(public_url, short_id, filename))
    } else {
      warn!("Analysis of {short_id} references image {filename} that was not extracted");
      caps[0].to_string()
    }
  });

  for caps in ANY_IMAGE.captures_iter(&rewritten) {
    let target = &caps[1];
    let absolute = ["http://", "https://", "data:"].iter().any(|p| target.starts_with(p));
    if !absolute && !target.starts_with("images/") {
      warn!("Left unrecognized image reference {target:?} in analysis of {short_id}");
    }
  }
  rewritten.into_owned()
}

/// Assembles the final document: header fields, analysis body and optional gallery.
pub fn assemble(paper: &Paper, body: &str, gallery: &[GalleryImage]) -> Result<String> {
  let link = paper.pdf_url.as_deref().unwrap_or(&paper.entry_id);
  let parts = [
    format!("# {}", paper.title),
    format!("**Authors:** {}", paper.authors.join(", ")),
    format!("**Link:** {link}"),
    format!("**Published:** {}", paper.published.to_rfc3339()),
    format!("**Categories:** {}", paper.categories.join(", ")),
    body.to_string(),
  ];
  Ok(parts.join("\n\n") + &gallery::render(gallery)?)
}

/// The first `max` characters of `text`.
fn truncate(text: &str, max: usize) -> String { text.chars().take(max).collect() }
