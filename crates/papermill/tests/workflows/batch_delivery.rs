use std::io::Read;

use papermill::{
  batch::{batch_outcome, deliver_existing, run_fetch},
  search::SearchQuery,
  status::{JobState, JobTracker, Terminal},
};

use super::*;

fn zip_names(bytes: &[u8]) -> Vec<String> {
  let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
  let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
  names.sort();
  names
}

#[tokio::test]
async fn test_three_paper_batch_delivers_one_zip() -> TestResult<()> {
  let harness = Harness::new().await;
  let papers = vec![
    paper("2401.00101v1", "Alpha"),
    paper("2401.00102v1", "Beta"),
    paper("2401.00103v1", "Gamma"),
  ];
  let messages = Messages::default();

  let report = run_batch(
    &harness.analyzer,
    &harness.courier,
    &harness.history,
    &papers,
    Some("reader@example.com"),
    &messages,
  )
  .await?;

  assert_eq!(report.analyzed, 3);
  assert_eq!(report.delivered, 3);
  assert_eq!(report.recorded, 3);

  let sent = harness.transport.sent.lock().unwrap();
  assert_eq!(sent.len(), 1);
  let delivery = &sent[0];
  assert_eq!(delivery.recipients, vec!["reader@example.com"]);
  assert_eq!(delivery.subject, "ArXiv Daily Papers - 3 new papers");
  assert!(delivery.attachment.filename.starts_with("arxiv_papers_"));
  assert!(delivery.attachment.filename.ends_with(".zip"));
  assert_eq!(zip_names(&delivery.attachment.bytes), vec!["Alpha.md", "Beta.md", "Gamma.md"]);

  let mut archive = zip::ZipArchive::new(std::io::Cursor::new(delivery.attachment.bytes.clone()))?;
  let mut alpha = String::new();
  archive.by_name("Alpha.md")?.read_to_string(&mut alpha)?;
  assert!(alpha.starts_with("# Alpha\n\n"));

  for paper in &papers {
    assert!(harness.history.contains(&paper.entry_id).await);
  }
  let messages = messages.0.lock().unwrap();
  assert_eq!(messages[0], "Analyzing paper 1/3: Alpha");
  assert_eq!(messages.last().unwrap(), "All 3 papers analyzed. Zipping and sending email...");
  Ok(())
}

#[tokio::test]
async fn test_single_paper_batch_delivers_markdown() -> TestResult<()> {
  let harness = Harness::new().await;
  let papers = vec![paper("2401.00201v1", "What/Is: Attention?")];

  run_batch(&harness.analyzer, &harness.courier, &harness.history, &papers, None, &LogProgress)
    .await?;

  let sent = harness.transport.sent.lock().unwrap();
  let delivery = &sent[0];
  assert_eq!(delivery.attachment.filename, "WhatIs Attention.md");
  assert_eq!(delivery.attachment.content_type, "text/markdown");
  assert_eq!(delivery.subject, "What/Is: Attention?");
  assert_eq!(delivery.body, "Attached is your requested paper analysis.");
  assert_eq!(delivery.recipients, vec!["team@example.com"]);
  Ok(())
}

#[tokio::test]
async fn test_delivery_failure_records_nothing() -> TestResult<()> {
  let harness =
    Harness::with(FakeSource::default(), Some(FakeParser::with_figures()), true, true).await;
  let papers = vec![paper("2401.00301v1", "One"), paper("2401.00302v1", "Two")];

  let result =
    run_batch(&harness.analyzer, &harness.courier, &harness.history, &papers, None, &LogProgress)
      .await;

  assert!(matches!(result, Err(MillError::Delivery(_))));
  for paper in &papers {
    assert!(!harness.history.contains(&paper.entry_id).await);
  }
  assert!(harness.history.is_empty().await);
  assert!(!harness.history.path().exists());
  assert_eq!(batch_outcome(result).0, Terminal::Error);
  Ok(())
}

#[tokio::test]
async fn test_failed_analysis_is_still_delivered() -> TestResult<()> {
  let harness =
    Harness::with(FakeSource::default(), Some(FakeParser::failing()), true, false).await;
  let papers = vec![paper("2401.00401v1", "Broken")];

  let report =
    run_batch(&harness.analyzer, &harness.courier, &harness.history, &papers, None, &LogProgress)
      .await?;

  assert_eq!(report.failed, 1);
  let sent = harness.transport.sent.lock().unwrap();
  let body = String::from_utf8(sent[0].attachment.bytes.clone())?;
  assert!(body.starts_with("[Analysis Failed"));
  Ok(())
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
  let harness = Harness::new().await;
  let result =
    run_batch(&harness.analyzer, &harness.courier, &harness.history, &[], None, &LogProgress).await;
  assert!(matches!(result, Err(MillError::InvalidRequest(_))));
  assert!(harness.transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_deliver_existing() -> TestResult<()> {
  let harness = Harness::new().await;
  let paper = paper("2401.00501v1", "Stored");

  let missing = deliver_existing(&harness.store, &harness.courier, &paper, None).await;
  assert!(matches!(missing, Err(MillError::NotFound(_))));

  harness.analyzer.analyze(&paper, &LogProgress).await;
  assert!(!harness.history.contains(&paper.entry_id).await);

  deliver_existing(&harness.store, &harness.courier, &paper, Some("me@example.com")).await?;

  assert!(harness.history.contains(&paper.entry_id).await);
  assert_eq!(harness.transport.sent.lock().unwrap()[0].recipients, vec!["me@example.com"]);
  Ok(())
}

#[tokio::test]
async fn test_batch_runs_under_tracker() -> TestResult<()> {
  let harness = Arc::new(Harness::new().await);
  let tracker = JobTracker::new();
  let handle = tracker.start("Analysis task started...")?;
  assert!(tracker.start("second").is_err());
  assert_eq!(tracker.read().message, "Analysis task started...");

  let papers = vec![paper("2401.00601v1", "Tracked")];
  let job = {
    let harness = harness.clone();
    let progress = handle.clone();
    async move {
      let result = run_batch(
        &harness.analyzer,
        &harness.courier,
        &harness.history,
        &papers,
        None,
        &progress,
      )
      .await;
      Ok::<_, MillError>(batch_outcome(result))
    }
  };
  handle.spawn(job).await?;

  let status = tracker.read();
  assert_eq!(status.status, JobState::Success);
  assert_eq!(status.message, "Process complete. Emailed 1 analyzed papers.");
  assert!(tracker.start("next run").is_ok());
  Ok(())
}

struct CannedSearch(Vec<Paper>);

#[async_trait]
impl PaperSearch for CannedSearch {
  async fn search(&self, _query: &SearchQuery) -> papermill::error::Result<Vec<Paper>> {
    Ok(self.0.clone())
  }

  fn default_categories(&self) -> Vec<String> { vec!["cs.AI".to_string(), "cs.CV".to_string()] }
}

#[tokio::test]
async fn test_fetch_groups_results() -> TestResult<()> {
  let a = paper("2401.00701v1", "A");
  let search = CannedSearch(vec![a.clone(), a.clone(), paper("2401.00702v1", "B")]);

  let report = run_fetch(&search, &SearchQuery::new(), &LogProgress).await?;

  assert_eq!(report.papers.len(), 2);
  assert_eq!(report.by_category.len(), 1);
  assert_eq!(report.by_category["cs.AI"].len(), 2);
  assert_eq!(
    report.outcome(),
    (Terminal::ReviewReady, "Found 2 papers. Ready for review.".to_string())
  );

  let empty = run_fetch(&CannedSearch(Vec::new()), &SearchQuery::new(), &LogProgress).await?;
  assert_eq!(empty.outcome().1, "Process finished. No new papers found.");
  Ok(())
}
