//! Module for clearing cached analyses together with the delivery history.

use super::*;

/// Function for the [`Commands::Clear`] in the CLI.
pub async fn clear(cli: &Cli, config: Config) -> Result<()> {
  let root = config.artifacts_path();
  if !root.exists() && !config.history_path().exists() {
    println!(
      "{} Nothing to clear under: {}",
      style(WARNING_PREFIX).yellow(),
      style(config.data_dir.display()).yellow()
    );
    return Ok(());
  }
  println!("{} Analyses found at: {}", style(WARNING_PREFIX).yellow(), style(root.display()).yellow());

  if !cli.accept_defaults {
    if !dialoguer::Confirm::new()
      .with_prompt("Are you sure you want to delete every cached analysis and the history?")
      .default(false)
      .wait_for_newline(true)
      .interact()?
    {
      println!("{} Operation cancelled", style(ERROR_PREFIX).red());
      return Ok(());
    }

    let input = dialoguer::Input::<String>::new()
      .with_prompt(format!(
        "{} Type {} to confirm deletion",
        style("⚠️").red(),
        style("DELETE").red().bold()
      ))
      .interact_text()?;

    if input != "DELETE" {
      println!("{} Operation cancelled", style(ERROR_PREFIX).red());
      return Ok(());
    }
  }

  let history = Arc::new(HistoryStore::open(config.history_path()).await?);
  let store = ArtifactStore::open(&root, history).await?;
  let removed = store.clear().await?;
  println!(
    "{} Cache cleared: removed {} analyses and the delivery history",
    style(SUCCESS_PREFIX).green(),
    style(removed).yellow()
  );
  Ok(())
}
