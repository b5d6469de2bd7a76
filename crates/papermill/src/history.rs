//! Durable record of papers that were analyzed and delivered.
//!
//! The history is a single JSON object mapping each paper's `entry_id` to the [`Paper`] snapshot
//! taken when it was first processed. It only ever grows until it is explicitly cleared, and an
//! existing entry is never overwritten.
//!
//! Every update rewrites the whole map: the new contents are staged in a `.tmp` sibling and then
//! renamed over the real file. A crash at any point leaves either the old map or the new one on
//! disk. A leftover `.tmp` file is ignored on open and replaced by the next write.
//!
//! The file is the source of truth. The server, a cron `papermill run` and `papermill clear` all
//! share it, so every merge starts from what is on disk rather than from this process's last
//! snapshot, and readers reload the file before answering.

use tokio::{
  io::AsyncWriteExt,
  sync::{Mutex, RwLock},
};

use super::*;

/// Processed-paper history backed by a JSON file.
///
/// Readers see an in-memory snapshot that is reloaded from disk on each query and swapped only
/// after a file rename succeeds. Writers in this process are serialized, so two batches
/// finishing at the same time cannot lose each other's entries.
///
/// # Examples
///
/// ```no_run
/// # use papermill::{history::HistoryStore, paper::Paper};
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let history = HistoryStore::open(HistoryStore::default_path()).await?;
/// let paper = Paper::new("http://arxiv.org/abs/2401.01234v1", "A Paper");
///
/// assert_eq!(history.record_batch(&[paper.clone()]).await?, 1);
/// assert_eq!(history.record_batch(&[paper.clone()]).await?, 0);
/// assert!(history.contains(&paper.entry_id).await);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct HistoryStore {
  /// Location of the JSON file
  path:    PathBuf,
  /// Last contents read from or written to disk
  entries: RwLock<BTreeMap<String, Paper>>,
  /// Serializes read-merge-write cycles
  writer:  Mutex<()>,
}

/// A fully written `.tmp` sibling that has not been renamed into place yet.
struct StagedHistory {
  /// Temporary file holding the new map
  staged: PathBuf,
  /// File the staged copy will replace
  target: PathBuf,
}

impl StagedHistory {
  /// Renames the staged file over the target.
  async fn commit(self) -> Result<()> {
    tokio::fs::rename(&self.staged, &self.target).await?;
    Ok(())
  }
}

impl HistoryStore {
  /// Opens the history at `path`, creating parent directories as needed.
  ///
  /// A missing file is an empty history. A file that exists but does not parse is an error,
  /// because silently starting over would re-deliver every paper.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }

    let entries = load(&path).await?;
    debug!("Opened history at {path:?} with {} entries", entries.len());

    Ok(Self { path, entries: RwLock::new(entries), writer: Mutex::new(()) })
  }

  /// Returns the default location of the history file.
  ///
  /// - On Unix: `~/.local/share/papermill/history.json`
  /// - On macOS: `~/Library/Application Support/papermill/history.json`
  /// - On Windows: `%APPDATA%\papermill\history.json`
  pub fn default_path() -> PathBuf { Config::default_data_dir().join("history.json") }

  /// Location of the backing file.
  pub fn path(&self) -> &Path { &self.path }

  /// Whether `entry_id` has been recorded.
  pub async fn contains(&self, entry_id: &str) -> bool {
    self.refresh().await;
    self.entries.read().await.contains_key(entry_id)
  }

  /// Number of recorded papers.
  pub async fn len(&self) -> usize {
    self.refresh().await;
    self.entries.read().await.len()
  }

  /// Whether nothing has been recorded.
  pub async fn is_empty(&self) -> bool { self.len().await == 0 }

  /// All recorded papers, ordered by identifier.
  pub async fn entries(&self) -> Vec<Paper> {
    self.refresh().await;
    self.entries.read().await.values().cloned().collect()
  }

  /// Reloads the snapshot from disk.
  ///
  /// A file that cannot be read keeps the previous snapshot, so a reader racing a broken write
  /// still gets an answer.
  async fn refresh(&self) {
    match load(&self.path).await {
      Ok(entries) => *self.entries.write().await = entries,
      Err(e) => warn!("Keeping cached history, could not reload {:?}: {e}", self.path),
    }
  }

  /// Records every paper in `papers` that is not already present.
  ///
  /// Duplicates inside `papers` are collapsed (the first one wins), and existing entries are
  /// left untouched. Returns how many identifiers were added. When that number is zero the file
  /// is not rewritten at all.
  pub async fn record_batch(&self, papers: &[Paper]) -> Result<usize> {
    let _guard = self.writer.lock().await;

    let mut merged = load(&self.path).await?;
    let mut added = 0;
    for paper in papers {
      if !merged.contains_key(&paper.entry_id) {
        merged.insert(paper.entry_id.clone(), paper.clone());
        added += 1;
      }
    }

    if added == 0 {
      debug!("History already contains all {} papers", papers.len());
      *self.entries.write().await = merged;
      return Ok(0);
    }

    self.stage(&merged).await?.commit().await?;
    *self.entries.write().await = merged;
    info!("Recorded {added} new papers in history");
    Ok(added)
  }

  /// Removes every entry.
  pub async fn forget_all(&self) -> Result<()> {
    let _guard = self.writer.lock().await;
    let empty = BTreeMap::new();
    self.stage(&empty).await?.commit().await?;
    *self.entries.write().await = empty;
    info!("Cleared processed history at {:?}", self.path);
    Ok(())
  }

  /// Writes `entries` to the `.tmp` sibling and flushes it to disk.
  async fn stage(&self, entries: &BTreeMap<String, Paper>) -> Result<StagedHistory> {
    let staged = self.path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(entries)?;

    let mut file = tokio::fs::File::create(&staged).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    trace!("Staged {} history entries at {staged:?}", entries.len());

    Ok(StagedHistory { staged, target: self.path.clone() })
  }
}

/// Reads the map at `path`. A missing or blank file is an empty history.
async fn load(path: &Path) -> Result<BTreeMap<String, Paper>> {
  match tokio::fs::read(path).await {
    Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
    Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
    Err(e) => Err(e.into()),
  }
}
