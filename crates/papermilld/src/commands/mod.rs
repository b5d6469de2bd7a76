use super::*;

pub mod clear;
pub mod history;
pub mod init;
pub mod run;
pub mod serve;

pub use clear::clear;
pub use history::{history, HistoryOptions};
pub use init::{init, InitOptions};
pub use run::{run, RunOptions};
pub use serve::{serve, ServeOptions};

/// Available commands for the CLI
#[derive(Subcommand, Clone)]
pub enum Commands {
  /// Write a default configuration file
  Init(InitOptions),

  /// Serve the JSON API for the web frontend
  Serve(ServeOptions),

  /// Fetch new papers, analyze them and email the results in one go
  Run(RunOptions),

  /// Removes every cached analysis and the delivery history after confirmation
  Clear,

  /// List papers that were already analyzed and delivered
  History(HistoryOptions),
}
