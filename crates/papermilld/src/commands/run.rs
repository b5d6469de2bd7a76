//! Module for one-shot subscription runs, meant to be scheduled from cron.

use super::*;

/// Options for [`Commands::Run`].
#[derive(Args, Clone)]
pub struct RunOptions {
  /// How far back to search: recent, last_month, last_3_months, last_year or last_2_years
  #[arg(long, default_value = "recent")]
  pub date_range:   String,
  /// arXiv category to search (repeatable), the configured defaults when omitted
  #[arg(long = "category")]
  pub categories:   Vec<String>,
  /// Keyword that must appear in title or abstract (repeatable)
  #[arg(long = "keyword")]
  pub keywords:     Vec<String>,
  /// Recipient of the results, the configured defaults when omitted
  #[arg(long)]
  pub email:        Option<String>,
  /// Also analyze papers that were already delivered
  #[arg(long, action = ArgAction::SetTrue)]
  pub include_seen: bool,
}

/// Function for the [`Commands::Run`] in the CLI.
///
/// Fetches papers, drops those already in the history unless `--include-seen` is given, then
/// analyzes and delivers the rest as one batch.
pub async fn run(config: Config, options: RunOptions) -> Result<()> {
  let RunOptions { date_range, categories, keywords, email, include_seen } = options;

  let mut query = SearchQuery::new().with_date_range(date_range.parse()?);
  for category in &categories {
    query = query.with_category(category);
  }
  for keyword in &keywords {
    query = query.with_keyword(keyword);
  }

  let mill = Mill::from_config(config).await?;
  let progress = |message: &str| println!("{} {message}", style(INFO_PREFIX).cyan());

  let report = run_fetch(mill.search.as_ref(), &query, &progress).await?;
  let found = report.papers.len();
  let mut papers = Vec::with_capacity(found);
  for paper in report.papers {
    if include_seen || !mill.history.contains(&paper.entry_id).await {
      papers.push(paper);
    }
  }
  info!("{} of {found} fetched papers are new", papers.len());

  if papers.is_empty() {
    println!("{} Process finished. No new papers found.", style(SUCCESS_PREFIX).green());
    return Ok(());
  }
  println!(
    "{} Found {} new papers ({} already delivered)",
    style(INFO_PREFIX).cyan(),
    style(papers.len()).yellow(),
    found - papers.len()
  );
  for paper in &papers {
    println!("   {} {}", style(ITEM_PREFIX).dim(), style(paper).white());
  }

  match run_batch(&mill.analyzer, &mill.courier, &mill.history, &papers, email.as_deref(), &progress)
    .await
  {
    Ok(report) => {
      println!("{} {}", style(SUCCESS_PREFIX).green(), report.summary());
      if report.failed > 0 {
        println!(
          "{} {} papers were delivered with a failure notice instead of an analysis",
          style(WARNING_PREFIX).yellow(),
          report.failed
        );
      }
      Ok(())
    },
    Err(e) => {
      error!("Subscription run failed: {e}");
      println!("{} {e}", style(ERROR_PREFIX).red());
      Err(e.into())
    },
  }
}
