//! Module for writing a fresh papermill configuration.

use super::*;

/// Options for [`Commands::Init`].
#[derive(Args, Clone)]
pub struct InitOptions {
  /// Directory for the history, artifacts, outbox and logs
  #[arg(long)]
  pub data_dir:   Option<PathBuf>,
  /// Base URL clients reach the server at, used in image links
  #[arg(long)]
  pub public_url: Option<String>,
  /// Endpoint of the PDF parsing service
  #[arg(long)]
  pub parser_url: Option<String>,
  /// Recipient used when a request names none (repeatable)
  #[arg(long = "recipient")]
  pub recipients: Vec<String>,
}

/// Function for the [`Commands::Init`] in the CLI.
///
/// Secrets are not written to the file; they are expected in the environment or `.env`.
pub fn init(cli: &Cli, path: &Path, options: InitOptions) -> Result<()> {
  let InitOptions { data_dir, public_url, parser_url, recipients } = options;

  if path.exists() {
    println!(
      "{} Configuration already exists at: {}",
      style(WARNING_PREFIX).yellow(),
      style(path.display()).yellow()
    );
    if !cli.accept_defaults
      && !dialoguer::Confirm::new()
        .with_prompt("Do you want to overwrite it?")
        .default(false)
        .wait_for_newline(true)
        .interact()?
    {
      println!("{} Operation cancelled", style(ERROR_PREFIX).red());
      return Ok(());
    }
  }

  let mut config = Config::default();
  if let Some(data_dir) = data_dir {
    config = config.with_data_dir(&data_dir);
  }
  if let Some(public_url) = public_url {
    config = config.with_public_url(&public_url);
  }
  if let Some(parser_url) = parser_url {
    config = config.with_parser_url(&parser_url);
  }
  if !recipients.is_empty() {
    let recipients: Vec<&str> = recipients.iter().map(String::as_str).collect();
    config = config.with_default_recipients(&recipients);
  }

  std::fs::create_dir_all(&config.data_dir)?;
  config.save(path)?;
  debug!("Wrote configuration {config:?}");

  println!(
    "{} Configuration initialized successfully\n   Config path: {}\n   Data directory: {}",
    style(SUCCESS_PREFIX).green(),
    style(path.display()).yellow(),
    style(config.data_dir.display()).yellow(),
  );
  if config.parser.url.is_none() {
    println!(
      "{} No PDF parser configured. Set PDF_PARSER_URL or pass --parser-url before analyzing.",
      style(INFO_PREFIX).cyan()
    );
  }
  Ok(())
}
