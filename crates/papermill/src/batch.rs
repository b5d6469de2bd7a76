//! Batch runs: analyze a set of papers in order, deliver them together, then record them.
//!
//! History is written only after the [`Courier`] confirms delivery. A failed delivery therefore
//! leaves every paper of the batch unrecorded, and a later batch treats them as new.
//!
//! The functions here report progress through a [`ProgressSink`] and return plain results. The
//! caller decides how a result maps onto the job tracker, usually through [`batch_outcome`] or
//! [`FetchReport::outcome`].

use super::*;
use crate::{
  delivery::Courier,
  search::{group_by_category, SearchQuery},
  status::Terminal,
  store::{Artifact, Outcome},
};

/// Counts from a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
  /// Papers analyzed from scratch
  pub analyzed:  usize,
  /// Papers served from the artifact store
  pub cached:    usize,
  /// Papers delivered with a diagnostic instead of an analysis
  pub failed:    usize,
  /// Papers in the delivery
  pub delivered: usize,
  /// Papers recorded in history for the first time
  pub recorded:  usize,
}

impl BatchReport {
  /// Final status message for a successful batch.
  pub fn summary(&self) -> String {
    format!("Process complete. Emailed {} analyzed papers.", self.delivered)
  }
}

/// Analyzes `papers` in order, delivers all of them in one message, then records them in
/// `history`.
///
/// Papers whose analysis failed are still delivered, carrying their diagnostic placeholder.
///
/// # Errors
///
/// - [`MillError::InvalidRequest`] for an empty batch, before any work starts
/// - [`MillError::Delivery`] or [`MillError::NoRecipients`] when delivery fails; nothing is
///   recorded in that case
/// - any error from writing the history file
pub async fn run_batch(
  analyzer: &Analyzer,
  courier: &Courier,
  history: &HistoryStore,
  papers: &[Paper],
  recipient: Option<&str>,
  progress: &dyn ProgressSink,
) -> Result<BatchReport> {
  if papers.is_empty() {
    return Err(MillError::InvalidRequest("No papers selected for analysis.".to_string()));
  }

  let total = papers.len();
  let mut report = BatchReport::default();
  let mut artifacts: Vec<Artifact> = Vec::with_capacity(total);
  for (index, paper) in papers.iter().enumerate() {
    progress.report(&format!("Analyzing paper {}/{total}: {}", index + 1, paper.title));
    let artifact = analyzer.analyze(paper, progress).await;
    match &artifact.outcome {
      Outcome::Analyzed => report.analyzed += 1,
      Outcome::Cached => report.cached += 1,
      Outcome::Failed(_) => report.failed += 1,
    }
    artifacts.push(artifact);
  }

  progress.report(&format!("All {total} papers analyzed. Zipping and sending email..."));
  courier.deliver(&artifacts, recipient).await?;
  report.delivered = total;

  report.recorded = history.record_batch(papers).await.map_err(|e| {
    error!("Delivered {total} papers but could not record them in history: {e}");
    e
  })?;
  info!(
    "Batch complete: {} analyzed, {} cached, {} failed, {} newly recorded",
    report.analyzed, report.cached, report.failed, report.recorded
  );
  Ok(report)
}

/// Maps the result of [`run_batch`] onto a terminal job state and message.
pub fn batch_outcome(result: Result<BatchReport>) -> (Terminal, String) {
  match result {
    Ok(report) => (Terminal::Success, report.summary()),
    Err(e @ (MillError::Delivery(_) | MillError::NoRecipients)) => {
      error!("Batch delivery failed: {e}");
      (Terminal::Error, format!("Email sending failed during analysis stage: {e}"))
    },
    Err(e) => {
      error!("Batch failed: {e}");
      (Terminal::Error, e.to_string())
    },
  }
}

/// Delivers the stored artifact of `paper` without analyzing it, then records it in history.
///
/// # Errors
///
/// [`MillError::NotFound`] when no artifact exists, or any delivery error.
pub async fn deliver_existing(
  store: &ArtifactStore,
  courier: &Courier,
  paper: &Paper,
  recipient: Option<&str>,
) -> Result<()> {
  let artifact = store.read(paper.short_id()).await?;
  courier.deliver(std::slice::from_ref(&artifact), recipient).await?;
  store.history().record_batch(std::slice::from_ref(artifact.paper())).await?;
  Ok(())
}

/// Papers found by a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
  /// Unique papers, newest first
  pub papers:      Vec<Paper>,
  /// The same papers grouped by requested category
  pub by_category: BTreeMap<String, Vec<Paper>>,
}

impl FetchReport {
  /// Terminal job state and message for this fetch.
  pub fn outcome(&self) -> (Terminal, String) {
    if self.papers.is_empty() {
      (Terminal::Success, "Process finished. No new papers found.".to_string())
    } else {
      (Terminal::ReviewReady, format!("Found {} papers. Ready for review.", self.papers.len()))
    }
  }
}

/// Runs `query` against `search`.
pub async fn run_fetch(
  search: &dyn PaperSearch,
  query: &SearchQuery,
  progress: &dyn ProgressSink,
) -> Result<FetchReport> {
  progress.report("Fetching papers...");
  let papers = search::dedupe(search.search(query).await?);
  let defaults = search.default_categories();
  let by_category = group_by_category(&papers, query.categories_or(&defaults));
  info!("Found {} papers across {} categories", papers.len(), by_category.len());
  Ok(FetchReport { papers, by_category })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_batch_outcome_messages() {
    let report = BatchReport { delivered: 3, ..BatchReport::default() };
    assert_eq!(
      batch_outcome(Ok(report)),
      (Terminal::Success, "Process complete. Emailed 3 analyzed papers.".to_string())
    );

    let (state, message) = batch_outcome(Err(MillError::NoRecipients));
    assert_eq!(state, Terminal::Error);
    assert!(message.starts_with("Email sending failed during analysis stage"));

    let (state, message) = batch_outcome(Err(MillError::InvalidRequest("empty".into())));
    assert_eq!(state, Terminal::Error);
    assert!(!message.starts_with("Email"));
  }

  #[test]
  fn test_fetch_outcome() {
    assert_eq!(FetchReport::default().outcome().0, Terminal::Success);
    let report = FetchReport { papers: vec![Paper::new("1", "A")], ..FetchReport::default() };
    assert_eq!(
      report.outcome(),
      (Terminal::ReviewReady, "Found 1 papers. Ready for review.".to_string())
    );
  }
}
