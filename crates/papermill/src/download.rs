//! Fetching source documents.

use super::*;

/// Something that can fetch a paper's PDF to a local file.
#[async_trait]
pub trait DocumentSource: Send + Sync {
  /// Downloads `url` to `dest`, returning the number of bytes written.
  async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Downloads documents over HTTP with bounded retries.
#[derive(Debug, Clone)]
pub struct HttpSource {
  /// Client with the configured timeout
  client:  reqwest::Client,
  /// Extra attempts for transient failures
  retries: u32,
}

impl HttpSource {
  /// Creates a source whose requests time out after `timeout`.
  pub fn new(timeout: Duration, retries: u32) -> Result<Self> {
    Ok(Self { client: retry::client(timeout)?, retries })
  }
}

#[async_trait]
impl DocumentSource for HttpSource {
  async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
    let bytes = retry::with_backoff("PDF download", self.retries, || async move {
      let response = self.client.get(url).send().await?;
      if !response.status().is_success() {
        trace!("PDF response for {url}: {response:?}");
      }
      Ok(response.error_for_status()?.bytes().await?)
    })
    .await?;

    if bytes.is_empty() {
      return Err(MillError::ApiError(format!("empty document at {url}")));
    }
    tokio::fs::write(dest, &bytes).await?;
    debug!("Wrote {} bytes from {url} to {dest:?}", bytes.len());
    Ok(bytes.len() as u64)
  }
}

/// A downloaded file that is deleted when dropped.
#[derive(Debug)]
pub struct StagedFile {
  /// Location of the file
  path: PathBuf,
}

impl StagedFile {
  /// Takes ownership of `path`; the file need not exist yet.
  pub fn new(path: PathBuf) -> Self { Self { path } }

  /// Location of the file.
  pub fn path(&self) -> &Path { &self.path }
}

impl Drop for StagedFile {
  fn drop(&mut self) {
    match std::fs::remove_file(&self.path) {
      Ok(()) => trace!("Removed staged file {:?}", self.path),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
      Err(e) => warn!("Failed to remove staged file {:?}: {e}", self.path),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_staged_file_removed_on_drop() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("2401.00001v1.pdf");
    std::fs::write(&path, b"%PDF").unwrap();
    {
      let staged = StagedFile::new(path.clone());
      assert!(staged.path().exists());
    }
    assert!(!path.exists());

    // Dropping a guard for a file that was never written is fine.
    drop(StagedFile::new(dir.path().join("never.pdf")));
  }

  #[traced_test]
  #[tokio::test]
  async fn test_unreachable_host_fails() {
    let dir = tempdir().unwrap();
    let source = HttpSource::new(Duration::from_secs(5), 0).unwrap();
    let dest = dir.path().join("x.pdf");
    assert!(source.fetch("http://127.0.0.1:9/x.pdf", &dest).await.is_err());
    assert!(!dest.exists());
  }
}
