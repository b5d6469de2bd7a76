//! Command line interface and HTTP server for the papermill analysis pipeline.
//!
//! This crate provides the `papermill` binary on top of the `papermill` library. It supports:
//! - Writing a default configuration file
//! - Serving the JSON API used by the web frontend
//! - One-shot subscription runs from cron
//! - Inspecting the processed-paper history
//! - Clearing cached analyses
//!
//! # Usage
//!
//! ```bash
//! # Write a default configuration
//! papermill init
//!
//! # Serve the API on port 5001
//! papermill serve --port 5001
//!
//! # Analyze and email this week's new agent papers
//! papermill run --category cs.AI --keyword agent --email me@example.com
//!
//! # List what has already been delivered
//! papermill history
//!
//! # Remove every cached analysis
//! papermill clear
//! ```
//!
//! Settings from a `.env` file in the working directory and from the environment override the
//! configuration file. Use `-v` repeatedly for more log output.

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use clap::{builder::ArgAction, Args, Parser, Subcommand};
use console::style;
use papermill::{
  batch::run_fetch, error::MillError, history::HistoryStore, prelude::*, store::ArtifactStore,
  Config, Mill,
};
use tracing::{debug, error, info, trace};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod commands;
pub mod error;
pub mod server;

use crate::{commands::*, error::*};

/// Prefix for information messages
static INFO_PREFIX: &str = "ℹ ";
/// Prefix for success messages
static SUCCESS_PREFIX: &str = "✓ ";
/// Prefix for warning messages
static WARNING_PREFIX: &str = "⚠️ ";
/// Prefix for error messages
static ERROR_PREFIX: &str = "✗ ";
/// Prefix for list items
static ITEM_PREFIX: &str = "├─";

/// Command line interface configuration and argument parsing
#[derive(Parser)]
#[command(author, version, about = "Server and CLI for the papermill analysis pipeline")]
pub struct Cli {
  /// Verbose mode (-v, -vv, -vvv) for different levels of logging detail
  #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true,
        help = "Increase logging verbosity"
    )]
  verbose: u8,

  /// Path to the configuration file. If not specified, uses the default platform-specific
  /// configuration directory.
  #[arg(long, short, global = true)]
  path: Option<PathBuf>,

  /// The subcommand to execute
  #[command(subcommand)]
  command: Option<Commands>,

  /// Skip all prompts and accept defaults (mostly for testing)
  #[arg(long, hide = true, global = true)]
  accept_defaults: bool,
}

impl Cli {
  /// The configuration file this invocation works with.
  fn config_path(&self) -> PathBuf { self.path.clone().unwrap_or_else(Config::default_path) }
}

/// Configures the logging system based on the verbosity level
///
/// The verbosity levels are:
/// - 0: error (default)
/// - 1: warn
/// - 2: info
/// - 3: debug
/// - 4+: trace
///
/// `RUST_LOG` takes precedence when set. With a `log_dir`, records are also written to a
/// daily-rolling `papermill.log` in that directory; the returned guard must be held until exit
/// so buffered lines are flushed.
fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Option<WorkerGuard> {
  let filter = match verbosity {
    0 => "error",
    1 => "warn",
    2 => "info",
    3 => "debug",
    _ => "trace",
  };

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

  let console = tracing_subscriber::fmt::layer()
    .with_file(true)
    .with_line_number(true)
    .with_thread_ids(true)
    .with_target(true);

  match log_dir {
    Some(dir) => {
      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "papermill.log"));
      let file = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true);
      tracing_subscriber::registry().with(filter).with(console).with(file).init();
      Some(guard)
    },
    None => {
      tracing_subscriber::registry().with(filter).with(console).init();
      None
    },
  }
}

/// Loads the configuration file at `path` and applies environment overrides.
fn load_config(path: &Path) -> Result<Config> {
  match Config::load(path) {
    Ok(config) => Ok(config.apply_env()),
    Err(e) => {
      eprintln!(
        "{} Failed to open papermill config at {}! Please run `papermill init` to set up a \
         config!",
        style(ERROR_PREFIX).red(),
        style(path.display()).yellow(),
      );
      Err(e.into())
    },
  }
}

/// Entry point for the papermill CLI application
///
/// Loads `.env`, parses the command line, sets up logging, loads the configuration (except for
/// `init`) and runs the requested command.
///
/// # Errors
///
/// Returns [`PapermilldError`] when the configuration cannot be loaded, a prompt fails, the
/// server cannot bind, or the library reports a failure.
#[tokio::main]
async fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  let cli = Cli::parse();

  let Some(command) = cli.command.clone() else {
    println!("Please specify a command. Use --help for usage information.");
    std::process::exit(1);
  };
  let path = cli.config_path();

  match command {
    Commands::Init(options) => {
      let _guard = setup_logging(cli.verbose, None);
      init(&cli, &path, options)
    },
    Commands::Serve(options) => {
      let config = load_config(&path)?;
      let log_dir = config.logs_path();
      std::fs::create_dir_all(&log_dir)?;
      let _guard = setup_logging(cli.verbose.max(2), Some(&log_dir));
      trace!("Using configuration at {}", path.display());
      serve(config, options).await
    },
    Commands::Run(options) => {
      let _guard = setup_logging(cli.verbose, None);
      run(load_config(&path)?, options).await
    },
    Commands::Clear => {
      let _guard = setup_logging(cli.verbose, None);
      clear(&cli, load_config(&path)?).await
    },
    Commands::History(options) => {
      let _guard = setup_logging(cli.verbose, None);
      history(load_config(&path)?, options).await
    },
  }
}
