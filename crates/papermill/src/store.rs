//! Per-paper artifact directories.
//!
//! Every analyzed paper owns one directory named after its short identifier:
//!
//! ```text
//! <root>/
//!   2401.01234v1/
//!     analysis.md       rendered document
//!     metadata.json     paper fields, extracted image names, analysis time
//!     raw_content.md    parser output, kept for inspection
//!     images/           extracted figures
//!   .staging/           drafts being written
//!   .trash/             replaced artifacts awaiting deletion
//! ```
//!
//! Writers never touch a live directory. An [`ArtifactDraft`] collects images and the document
//! in `.staging/`, and [`ArtifactStore::write`] renames the finished draft into place. A reader
//! therefore sees either the previous complete artifact or the new complete artifact.

use std::sync::atomic::{AtomicU64, Ordering};

use super::*;
use crate::gallery::GalleryImage;

/// Name of the rendered document inside an artifact directory.
const DOCUMENT_FILE: &str = "analysis.md";
/// Name of the metadata record inside an artifact directory.
const METADATA_FILE: &str = "metadata.json";
/// Name of the raw parser output inside an artifact directory.
const RAW_FILE: &str = "raw_content.md";
/// Name of the image subdirectory.
const IMAGES_DIR: &str = "images";
/// Directory holding drafts that have not been committed.
const STAGING_DIR: &str = ".staging";
/// Directory holding replaced artifacts until they are deleted.
const TRASH_DIR: &str = ".trash";
/// How many times [`ArtifactStore::read`] retries when the artifact is replaced mid-read.
const READ_ATTEMPTS: usize = 5;

/// Metadata stored next to each rendered document.
///
/// The paper's fields are flattened into the top level of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
  /// Snapshot of the paper that was analyzed
  #[serde(flatten)]
  pub paper:                     Paper,
  /// Images that were extracted and saved, in extraction order
  #[serde(default)]
  pub extracted_image_filenames: Vec<String>,
  /// When the analysis finished
  pub analyzed_at:               DateTime<Utc>,
}

/// How an [`Artifact`] came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// Freshly produced by the pipeline
  Analyzed,
  /// Read back from the store without calling any collaborator
  Cached,
  /// The pipeline failed, the document is a diagnostic placeholder and nothing was persisted
  Failed(String),
}

/// The output of analyzing one paper.
#[derive(Debug, Clone)]
pub struct Artifact {
  /// Rendered markdown, including the header fields and the optional gallery manifest
  pub document: String,
  /// Paper snapshot and extracted image names
  pub metadata: ArtifactMetadata,
  /// Whether this artifact was produced, read from disk or is a diagnostic
  pub outcome:  Outcome,
}

impl Artifact {
  /// Builds a placeholder artifact carrying a failure message in place of an analysis.
  pub fn diagnostic(paper: &Paper, document: String) -> Self {
    Self {
      outcome:  Outcome::Failed(document.clone()),
      document,
      metadata: ArtifactMetadata {
        paper:                     paper.clone(),
        extracted_image_filenames: Vec::new(),
        analyzed_at:               Utc::now(),
      },
    }
  }

  /// The analyzed paper.
  pub fn paper(&self) -> &Paper { &self.metadata.paper }

  /// Short identifier of the analyzed paper.
  pub fn short_id(&self) -> &str { self.metadata.paper.short_id() }

  /// Names of the saved images.
  pub fn images(&self) -> &[String] { &self.metadata.extracted_image_filenames }

  /// Whether this artifact is a failure placeholder.
  pub fn is_diagnostic(&self) -> bool { matches!(self.outcome, Outcome::Failed(_)) }

  /// The gallery manifest embedded in the document.
  pub fn gallery(&self) -> Vec<GalleryImage> { gallery::extract(&self.document) }
}

/// A private staging directory for one artifact.
///
/// Dropping a draft without passing it to [`ArtifactStore::write`] deletes everything it
/// staged.
#[derive(Debug)]
pub struct ArtifactDraft {
  /// Paper the draft belongs to
  short_id: String,
  /// Staging directory
  dir:      PathBuf,
  /// Images saved so far, in order
  images:   Vec<String>,
}

impl ArtifactDraft {
  /// Short identifier the draft will be committed under.
  pub fn short_id(&self) -> &str { &self.short_id }

  /// Names of the images saved so far.
  pub fn images(&self) -> &[String] { &self.images }

  /// Saves one extracted image.
  ///
  /// Names that could escape the image directory are rejected with
  /// [`MillError::InvalidRequest`]. Saving the same name twice keeps only the latest bytes and
  /// lists the name once.
  pub async fn save_image(&mut self, filename: &str, bytes: &[u8]) -> Result<()> {
    if !is_safe_name(filename) {
      return Err(MillError::InvalidRequest(format!("unsafe image filename {filename:?}")));
    }
    tokio::fs::write(self.dir.join(IMAGES_DIR).join(filename), bytes).await?;
    if !self.images.iter().any(|name| name == filename) {
      self.images.push(filename.to_string());
    }
    trace!("Staged image {filename} ({} bytes) for {}", bytes.len(), self.short_id);
    Ok(())
  }

  /// Saves the parser's markdown output next to the document.
  pub async fn save_raw(&self, markdown: &str) -> Result<()> {
    tokio::fs::write(self.dir.join(RAW_FILE), markdown).await?;
    Ok(())
  }
}

impl Drop for ArtifactDraft {
  fn drop(&mut self) {
    if self.dir.exists() {
      if let Err(e) = std::fs::remove_dir_all(&self.dir) {
        warn!("Failed to discard draft {:?}: {e}", self.dir);
      }
    }
  }
}

/// Store of rendered analyses, one directory per paper.
///
/// The store holds the [`HistoryStore`] as well so that [`ArtifactStore::clear`] can empty both
/// together: a history entry without its artifact would make the cache check fail forever.
#[derive(Debug)]
pub struct ArtifactStore {
  /// Directory containing one subdirectory per artifact
  root:    PathBuf,
  /// History cleared alongside the artifacts
  history: Arc<HistoryStore>,
}

impl ArtifactStore {
  /// Opens the store rooted at `root`, creating the directory and clearing leftover drafts.
  pub async fn open(root: impl AsRef<Path>, history: Arc<HistoryStore>) -> Result<Self> {
    let root = root.as_ref().to_path_buf();
    tokio::fs::create_dir_all(&root).await?;
    for leftover in [STAGING_DIR, TRASH_DIR] {
      let dir = root.join(leftover);
      if tokio::fs::try_exists(&dir).await? {
        debug!("Removing leftover {leftover} directory under {root:?}");
        tokio::fs::remove_dir_all(&dir).await?;
      }
    }
    Ok(Self { root, history })
  }

  /// Returns the default artifact root, `<data dir>/papermill/analysis_results`.
  pub fn default_path() -> PathBuf { Config::default_data_dir().join("analysis_results") }

  /// Directory containing the artifacts.
  pub fn root(&self) -> &Path { &self.root }

  /// The history this store clears together with its artifacts.
  pub fn history(&self) -> &Arc<HistoryStore> { &self.history }

  /// Whether a complete artifact exists for `short_id`.
  pub async fn exists(&self, short_id: &str) -> bool {
    if !is_safe_name(short_id) {
      return false;
    }
    let dir = self.root.join(short_id);
    matches!(tokio::fs::try_exists(dir.join(DOCUMENT_FILE)).await, Ok(true))
      && matches!(tokio::fs::try_exists(dir.join(METADATA_FILE)).await, Ok(true))
  }

  /// Reads a stored artifact.
  ///
  /// The document and metadata always come from the same committed artifact. A read that races
  /// a regeneration of the same paper is retried.
  pub async fn read(&self, short_id: &str) -> Result<Artifact> {
    if !self.exists(short_id).await {
      return Err(MillError::NotFound(format!("analysis for {short_id}")));
    }
    let dir = self.root.join(short_id);

    let mut last_error = None;
    for attempt in 1..=READ_ATTEMPTS {
      match read_consistent(&dir).await {
        Ok(Some(artifact)) => return Ok(artifact),
        Ok(None) => debug!("Artifact {short_id} was replaced while reading ({attempt}/{READ_ATTEMPTS})"),
        Err(e) => {
          debug!("Reading artifact {short_id} failed ({attempt}/{READ_ATTEMPTS}): {e}");
          last_error = Some(e);
        },
      }
      tokio::task::yield_now().await;
    }
    Err(last_error.unwrap_or_else(|| MillError::NotFound(format!("analysis for {short_id}"))))
  }

  /// Opens a staging directory for a new artifact.
  pub async fn begin(&self, short_id: &str) -> Result<ArtifactDraft> {
    if !is_safe_name(short_id) {
      return Err(MillError::InvalidRequest(format!("unsafe paper identifier {short_id:?}")));
    }
    let dir = self.root.join(STAGING_DIR).join(format!("{short_id}-{}", nonce()));
    tokio::fs::create_dir_all(dir.join(IMAGES_DIR)).await?;
    Ok(ArtifactDraft { short_id: short_id.to_string(), dir, images: Vec::new() })
  }

  /// Commits a draft, replacing any previous artifact for the same paper.
  ///
  /// The document and metadata are written into the draft first. The finished draft is then
  /// renamed into place. If an older artifact exists it is moved aside just before the rename
  /// and deleted afterwards, or moved back if the rename fails.
  pub async fn write(
    &self,
    draft: ArtifactDraft,
    document: &str,
    metadata: &ArtifactMetadata,
  ) -> Result<Artifact> {
    let mut metadata = metadata.clone();
    metadata.extracted_image_filenames = draft.images.clone();

    tokio::fs::write(draft.dir.join(DOCUMENT_FILE), document).await?;
    tokio::fs::write(draft.dir.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?).await?;

    let target = self.root.join(&draft.short_id);
    let displaced = if tokio::fs::try_exists(&target).await? {
      let trash = self.root.join(TRASH_DIR);
      tokio::fs::create_dir_all(&trash).await?;
      let aside = trash.join(format!("{}-{}", draft.short_id, nonce()));
      tokio::fs::rename(&target, &aside).await?;
      Some(aside)
    } else {
      None
    };

    if let Err(e) = tokio::fs::rename(&draft.dir, &target).await {
      if let Some(aside) = &displaced {
        if let Err(restore) = tokio::fs::rename(aside, &target).await {
          error!("Failed to restore previous artifact for {}: {restore}", draft.short_id);
        }
      }
      return Err(e.into());
    }

    if let Some(aside) = displaced {
      if let Err(e) = tokio::fs::remove_dir_all(&aside).await {
        warn!("Failed to delete replaced artifact {aside:?}: {e}");
      }
    }
    debug!("Committed artifact {} with {} images", draft.short_id, draft.images.len());

    Ok(Artifact { document: document.to_string(), metadata, outcome: Outcome::Analyzed })
  }

  /// Reads one extracted image, returning its bytes and a content type guessed from the
  /// extension.
  pub async fn resolve_image(
    &self,
    short_id: &str,
    filename: &str,
  ) -> Result<(Vec<u8>, &'static str)> {
    if !is_safe_name(short_id) || !is_safe_name(filename) {
      return Err(MillError::NotFound(format!("image {short_id}/{filename}")));
    }
    let path = self.root.join(short_id).join(IMAGES_DIR).join(filename);
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok((bytes, content_type(filename))),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound =>
        Err(MillError::NotFound(format!("image {short_id}/{filename}"))),
      Err(e) => Err(e.into()),
    }
  }

  /// Metadata of every stored artifact, newest first.
  ///
  /// With a `query`, only artifacts whose identifier, title or authors contain it
  /// (case-insensitively) are returned. Artifacts with unreadable metadata are skipped.
  pub async fn list(&self, query: Option<&str>) -> Result<Vec<ArtifactMetadata>> {
    let needle = query.map(str::trim).filter(|q| !q.is_empty()).map(str::to_lowercase);

    let mut found = Vec::new();
    let mut dir = tokio::fs::read_dir(&self.root).await?;
    while let Some(entry) = dir.next_entry().await? {
      let name = entry.file_name().to_string_lossy().to_string();
      if name.starts_with('.') || !entry.file_type().await?.is_dir() {
        continue;
      }
      let metadata = match read_metadata(&entry.path()).await {
        Ok(metadata) => metadata,
        Err(e) => {
          warn!("Skipping artifact {name}: {e}");
          continue;
        },
      };

      let matches = needle.as_ref().map_or(true, |needle| {
        name.to_lowercase().contains(needle)
          || metadata.paper.title.to_lowercase().contains(needle)
          || metadata.paper.authors.iter().any(|a| a.to_lowercase().contains(needle))
      });
      if matches {
        found.push(metadata);
      }
    }

    found.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at));
    Ok(found)
  }

  /// Deletes every artifact and forgets every history entry.
  pub async fn clear(&self) -> Result<usize> {
    let mut removed = 0;
    let mut dir = tokio::fs::read_dir(&self.root).await?;
    while let Some(entry) = dir.next_entry().await? {
      if entry.file_type().await?.is_dir() {
        tokio::fs::remove_dir_all(entry.path()).await?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
          removed += 1;
        }
      } else {
        tokio::fs::remove_file(entry.path()).await?;
      }
    }
    self.history.forget_all().await?;
    info!("Cleared {removed} artifacts from {:?}", self.root);
    Ok(removed)
  }
}

/// Whether `name` can be used as a single path component without escaping its parent.
pub(crate) fn is_safe_name(name: &str) -> bool {
  !name.is_empty()
    && !name.starts_with('.')
    && !name.contains(['/', '\\', '\0'])
    && Path::new(name).components().count() == 1
}

/// A process-unique suffix for staging and trash directories.
fn nonce() -> String {
  static COUNTER: AtomicU64 = AtomicU64::new(0);
  format!("{}-{}", Utc::now().timestamp_micros(), COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Reads the document between two metadata reads.
///
/// Every commit renames a whole directory into place, so matching metadata on both sides means
/// the document belongs to it. `None` means the artifact changed in between.
async fn read_consistent(dir: &Path) -> Result<Option<Artifact>> {
  let before = read_metadata(dir).await?;
  let document = tokio::fs::read_to_string(dir.join(DOCUMENT_FILE)).await?;
  let metadata = read_metadata(dir).await?;
  Ok((before == metadata).then_some(Artifact { document, metadata, outcome: Outcome::Cached }))
}

/// Reads and parses `metadata.json` from an artifact directory.
async fn read_metadata(dir: &Path) -> Result<ArtifactMetadata> {
  let bytes = tokio::fs::read(dir.join(METADATA_FILE)).await?;
  Ok(serde_json::from_slice(&bytes)?)
}

/// Guesses an image content type from a filename's extension.
fn content_type(filename: &str) -> &'static str {
  let extension =
    Path::new(filename).extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
  match extension.as_deref() {
    Some("png") => "image/png",
    Some("jpg" | "jpeg") => "image/jpeg",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    Some("svg") => "image/svg+xml",
    Some("bmp") => "image/bmp",
    _ => "application/octet-stream",
  }
}
