use super::*;

#[traced_test]
#[tokio::test]
async fn test_fresh_analysis() -> TestResult<()> {
  let harness = Harness::new().await;
  let paper = paper("2401.00001v1", "Sparse: Attention?");
  let messages = Messages::default();

  let artifact = harness.analyzer.analyze(&paper, &messages).await;

  assert_eq!(artifact.outcome, Outcome::Analyzed);
  assert_eq!(artifact.images(), ["fig1.png"]);
  assert!(artifact.document.starts_with(
    "# Sparse: Attention?\n\n**Authors:** Ada Lovelace\n\n**Link:** http://arxiv.org/pdf/2401.00001v1"
  ));
  assert!(artifact.document.contains("![](http://mill.test/api/images/2401.00001v1/fig1.png)"));
  assert!(artifact.document.contains("![](images/broken.png)"));

  let gallery = artifact.gallery();
  assert_eq!(gallery.len(), 1);
  assert_eq!(gallery[0].url, "http://mill.test/api/images/2401.00001v1/fig1.png");
  assert_eq!(gallery[0].alt, "fig1.png");

  assert!(harness.store.exists("2401.00001v1").await);
  let (bytes, content_type) = harness.store.resolve_image("2401.00001v1", "fig1.png").await?;
  assert_eq!(bytes, b"png");
  assert_eq!(content_type, "image/png");
  assert!(harness.store.resolve_image("2401.00001v1", "broken.png").await.is_err());
  assert!(harness.dir.path().join("analysis_results/2401.00001v1/raw_content.md").exists());

  assert_eq!(*messages.0.lock().unwrap(), [
    "Downloading PDF: Sparse: Attention?...",
    "Parsing PDF with image extraction...",
    "Analyzing full text with LLM...",
  ]);
  let prompts = harness.completion.prompts.lock().unwrap();
  assert!(prompts[0].starts_with("Analyze this.\n\n---\n\n"));
  assert!(prompts[0].ends_with("Full text ![](images/fig1.png)"));
  assert_eq!(harness.scratch_files(), 0);
  Ok(())
}

#[tokio::test]
async fn test_undelivered_artifact_is_not_a_cache_hit() {
  let harness = Harness::new().await;
  let paper = paper("2401.00002v1", "Undelivered");

  harness.analyzer.analyze(&paper, &LogProgress).await;
  let second = harness.analyzer.analyze(&paper, &LogProgress).await;

  assert_eq!(second.outcome, Outcome::Analyzed);
  assert_eq!(harness.completion.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_delivered_paper_is_served_from_store() -> TestResult<()> {
  let harness = Harness::new().await;
  let paper = paper("2401.00003v1", "Delivered Once");

  run_batch(
    &harness.analyzer,
    &harness.courier,
    &harness.history,
    std::slice::from_ref(&paper),
    None,
    &LogProgress,
  )
  .await?;
  let calls = harness.collaborator_calls();
  let first = harness.store.read(paper.short_id()).await?;

  let messages = Messages::default();
  let again = harness.analyzer.analyze(&paper, &messages).await;
  let third = harness.analyzer.analyze(&paper, &messages).await;

  assert_eq!(again.outcome, Outcome::Cached);
  assert_eq!(again.document, first.document);
  assert_eq!(third.document, first.document);
  assert_eq!(harness.collaborator_calls(), calls);
  assert!(messages.0.lock().unwrap().is_empty());
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_failing_parser_yields_diagnostic() {
  let harness =
    Harness::with(FakeSource::default(), Some(FakeParser::failing()), true, false).await;
  let paper = paper("2401.00004v1", "Unparseable");

  let artifact = harness.analyzer.analyze(&paper, &LogProgress).await;

  assert!(artifact.is_diagnostic());
  assert!(artifact.document.contains("[Analysis Failed"));
  assert!(artifact.document.contains("parser returned 502"));
  assert!(!harness.store.exists("2401.00004v1").await);
  assert_eq!(harness.completion.calls.load(Ordering::SeqCst), 0);
  assert_eq!(harness.scratch_files(), 0);
}

#[tokio::test]
async fn test_empty_markdown_yields_diagnostic() {
  let harness = Harness::with(FakeSource::default(), Some(FakeParser::empty()), true, false).await;
  let artifact = harness.analyzer.analyze(&paper("2401.00005v1", "Blank"), &LogProgress).await;
  assert_eq!(artifact.document, "[Analysis Failed: Markdown content was empty after parsing]");
  assert_eq!(harness.scratch_files(), 0);
}

#[tokio::test]
async fn test_download_failure_yields_diagnostic() {
  let source = FakeSource { fail: true, ..FakeSource::default() };
  let harness = Harness::with(source, Some(FakeParser::with_figures()), true, false).await;

  let artifact = harness.analyzer.analyze(&paper("2401.00006v1", "Gone"), &LogProgress).await;

  assert!(artifact.document.starts_with("[Analysis Failed: could not download PDF"));
  assert_eq!(harness.parser.calls.load(Ordering::SeqCst), 0);
  assert_eq!(harness.scratch_files(), 0);
}

#[tokio::test]
async fn test_missing_pdf_url_yields_diagnostic() {
  let harness = Harness::new().await;
  let paper = Paper::new("http://arxiv.org/abs/2401.00007v1", "No Link");

  let artifact = harness.analyzer.analyze(&paper, &LogProgress).await;

  assert_eq!(artifact.document, "[Analysis Failed: Paper has no PDF URL]");
  assert_eq!(harness.source.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_completion_is_skipped() {
  let harness =
    Harness::with(FakeSource::default(), Some(FakeParser::with_figures()), false, false).await;

  let artifact = harness.analyzer.analyze(&paper("2401.00008v1", "No Key"), &LogProgress).await;

  assert_eq!(artifact.document, "[Analysis Skipped: API client not initialized]");
  assert_eq!(harness.collaborator_calls(), 0);
}

#[tokio::test]
async fn test_missing_parser_is_reported() -> TestResult<()> {
  let dir = tempdir()?;
  let history = Arc::new(HistoryStore::open(dir.path().join("history.json")).await?);
  let store = Arc::new(ArtifactStore::open(dir.path().join("analysis_results"), history).await?);
  let source = Arc::new(FakeSource::default());
  let analyzer = Analyzer::builder()
    .with_source(source.clone())
    .with_parser(None)
    .with_completion(Some(Arc::new(FakeCompletion::default())))
    .with_store(store)
    .with_scratch_dir(dir.path().join("scratch"))
    .build()?;

  let artifact = analyzer.analyze(&paper("2401.00009v1", "No Parser"), &LogProgress).await;

  assert_eq!(artifact.document, "[Analysis Failed: PDF parser URL not configured]");
  assert_eq!(source.calls.load(Ordering::SeqCst), 0);
  Ok(())
}

#[tokio::test]
async fn test_builder_requires_store() {
  let result = Analyzer::builder().with_source(Arc::new(FakeSource::default())).build();
  assert!(matches!(result, Err(MillError::Config(_))));
}

#[tokio::test]
async fn test_clear_empties_store_and_history() -> TestResult<()> {
  let harness = Harness::new().await;
  let paper = paper("2401.00010v1", "Cleared");
  run_batch(
    &harness.analyzer,
    &harness.courier,
    &harness.history,
    std::slice::from_ref(&paper),
    None,
    &LogProgress,
  )
  .await?;
  assert!(harness.store.exists("2401.00010v1").await);
  assert!(harness.history.contains(&paper.entry_id).await);

  assert_eq!(harness.store.clear().await?, 1);

  assert!(!harness.store.exists("2401.00010v1").await);
  assert!(!harness.history.contains(&paper.entry_id).await);
  let reopened = HistoryStore::open(harness.history.path()).await?;
  assert!(reopened.is_empty().await);
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_failing_completion_yields_diagnostic() {
  let harness = Harness::with_completion(FakeCompletion::failing()).await;

  let artifact = harness.analyzer.analyze(&paper("2401.00011v1", "Rate Limited"), &LogProgress).await;

  assert!(artifact.is_diagnostic());
  assert!(artifact.document.starts_with("[Analysis Failed: language model request failed"));
  assert!(artifact.document.contains("completion returned 500"));
  assert!(!harness.store.exists("2401.00011v1").await);
  assert!(!harness.dir.path().join("analysis_results/.staging").read_dir().unwrap().any(|_| true));
  assert_eq!(harness.scratch_files(), 0);
}

#[tokio::test]
async fn test_empty_completion_yields_diagnostic() {
  let harness = Harness::with_completion(FakeCompletion::replying(" \n\n ")).await;

  let artifact = harness.analyzer.analyze(&paper("2401.00012v1", "Speechless"), &LogProgress).await;

  assert_eq!(artifact.document, "[Analysis Failed: language model returned an empty response]");
  assert!(!harness.store.exists("2401.00012v1").await);
  assert_eq!(harness.scratch_files(), 0);
}

#[traced_test]
#[tokio::test]
async fn test_unwritable_store_still_delivers_analysis() -> TestResult<()> {
  let harness = Harness::new().await;
  let paper = paper("2401.00013v1", "Nowhere To Go");
  let root = harness.dir.path().join("analysis_results");
  std::fs::remove_dir_all(&root)?;
  std::fs::write(&root, "not a directory")?;

  let report = run_batch(
    &harness.analyzer,
    &harness.courier,
    &harness.history,
    std::slice::from_ref(&paper),
    None,
    &LogProgress,
  )
  .await?;

  assert_eq!(report.analyzed, 1);
  assert!(logs_contain("Could not stage artifact for 2401.00013v1"));
  let sent = harness.transport.sent.lock().unwrap().clone();
  let delivered = String::from_utf8(sent[0].attachment.bytes.clone())?;
  assert!(delivered.starts_with("# Nowhere To Go\n\n"));
  assert!(delivered.contains("Good paper."));
  assert!(!harness.store.exists(paper.short_id()).await);

  // Recorded as delivered, yet nothing was stored, so the next request analyzes again.
  assert!(harness.history.contains(&paper.entry_id).await);
  let again = harness.analyzer.analyze(&paper, &LogProgress).await;
  assert_eq!(again.outcome, Outcome::Analyzed);
  assert_eq!(harness.completion.calls.load(Ordering::SeqCst), 2);
  Ok(())
}

#[traced_test]
#[tokio::test]
async fn test_failed_commit_returns_unpersisted_artifact() -> TestResult<()> {
  let harness = Harness::new().await;
  let paper = paper("2401.00014v1", "Blocked Commit");
  let root = harness.dir.path().join("analysis_results");
  // A leftover directory without a document forces the old-artifact swap, and a file where the
  // trash directory belongs makes that swap fail.
  std::fs::create_dir_all(root.join(paper.short_id()))?;
  std::fs::write(root.join(".trash"), "in the way")?;

  let artifact = harness.analyzer.analyze(&paper, &LogProgress).await;

  assert_eq!(artifact.outcome, Outcome::Analyzed);
  assert_eq!(artifact.images(), ["fig1.png"]);
  assert!(artifact.document.contains("Good paper."));
  assert!(logs_contain("Failed to persist analysis for 2401.00014v1"));
  assert!(!harness.store.exists(paper.short_id()).await);
  assert!(!root.join(".staging").read_dir()?.any(|_| true));
  assert_eq!(harness.scratch_files(), 0);
  Ok(())
}
