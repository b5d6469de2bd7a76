//! Module for listing the delivery history.

use super::*;

/// Options for [`Commands::History`].
#[derive(Args, Clone)]
pub struct HistoryOptions {
  /// Only show papers whose title or identifier contains this text
  pub query: Option<String>,
  /// Show at most this many papers, newest first
  #[arg(long)]
  pub limit: Option<usize>,
}

/// Function for the [`Commands::History`] in the CLI.
pub async fn history(config: Config, options: HistoryOptions) -> Result<()> {
  let history = HistoryStore::open(config.history_path()).await?;
  let needle = options.query.as_deref().map(str::to_lowercase);

  let mut papers: Vec<Paper> = history
    .entries()
    .await
    .into_iter()
    .filter(|paper| {
      needle.as_ref().map_or(true, |needle| {
        paper.title.to_lowercase().contains(needle) || paper.entry_id.to_lowercase().contains(needle)
      })
    })
    .collect();
  papers.sort_by(|a, b| b.published.cmp(&a.published));
  if let Some(limit) = options.limit {
    papers.truncate(limit);
  }

  if papers.is_empty() {
    println!("{} No delivered papers found", style(WARNING_PREFIX).yellow());
    return Ok(());
  }

  println!(
    "{} {} of {} delivered papers:",
    style(INFO_PREFIX).cyan(),
    style(papers.len()).yellow(),
    history.len().await
  );
  for paper in &papers {
    println!(
      "   {} {} {}",
      style(ITEM_PREFIX).dim(),
      style(paper.short_id()).yellow(),
      style(&paper.title).white()
    );
  }
  Ok(())
}
