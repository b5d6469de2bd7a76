//! Result-caching analysis pipeline for arXiv papers.
//!
//! `papermill` turns paper records fetched from arXiv into durable analysis artifacts and
//! delivers them by email, providing:
//!
//! - A processed-paper history that survives restarts
//! - Per-paper artifact directories that are written atomically
//! - An analysis pipeline with a cache-hit short-circuit
//! - A job status tracker that pollers can read at any time
//! - A bulk orchestrator that only records history after delivery succeeds
//!
//! # Features
//!
//! - **Idempotent analysis**: a paper that was analyzed and delivered once is served from disk
//!   without touching the network again
//! - **Never-failing pipeline**: every failure turns into a diagnostic artifact so a batch always
//!   completes
//! - **Pluggable collaborators**: the download, parsing, language-model, search and transport
//!   services all sit behind traits
//!
//! # Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use papermill::{prelude::*, Config, Mill};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let config = Config::load(Config::default_path())?;
//!   let mill = Mill::from_config(config).await?;
//!
//!   let query = SearchQuery::new().with_category("cs.AI").with_keyword("agents");
//!   let papers = mill.search.search(&query).await?;
//!
//!   let handle = mill.tracker.start("Analyzing papers...")?;
//!   let report =
//!     run_batch(&mill.analyzer, &mill.courier, &mill.history, &papers, None, &handle).await?;
//!   println!("Delivered {} papers", report.delivered);
//!   Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`paper`]: The paper record shared by every boundary
//! - [`history`]: Durable set of papers that were analyzed and delivered
//! - [`store`]: Per-paper artifact directories and the figure gallery
//! - [`pipeline`]: Download, parse, analyze, assemble and persist one paper
//! - [`status`]: Job status tracking and progress reporting
//! - [`batch`]: Sequential batch runs followed by a single delivery
//! - [`delivery`]: Attachment packaging and outbound transports
//! - [`search`]: arXiv search client
//! - [`translate`]: Title and abstract translation
//! - [`prelude`]: Common traits and types for ergonomic imports

#![warn(missing_docs, clippy::missing_docs_in_private_items)]

use std::{
  collections::BTreeMap,
  fmt::Display,
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
  time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};
#[cfg(test)]
use {tempfile::tempdir, tracing_test::traced_test};

pub mod batch;
pub mod config;
pub mod delivery;
pub mod download;
pub mod error;
pub mod gallery;
pub mod history;
pub mod llm;
pub mod paper;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod search;
pub mod status;
pub mod store;
pub mod translate;

pub use config::Config;

use crate::{
  delivery::Courier,
  error::*,
  history::HistoryStore,
  paper::Paper,
  pipeline::Analyzer,
  search::PaperSearch,
  status::{JobTracker, ProgressSink},
  store::ArtifactStore,
};

/// Common traits and types for ergonomic imports.
///
/// ```no_run
/// use papermill::prelude::*;
///
/// fn example(paper: &Paper) -> Result<String, MillError> { Ok(paper.short_id().to_string()) }
/// ```
pub mod prelude {
  pub use crate::{
    batch::{run_batch, BatchReport},
    delivery::{Courier, Transport},
    download::DocumentSource,
    error::MillError,
    llm::Completion,
    paper::Paper,
    parser::DocumentParser,
    search::{PaperSearch, SearchQuery},
    status::{JobState, ProgressSink},
  };
}

/// Every long-lived service the pipeline needs, wired from a single [`Config`].
///
/// The request layer and the one-shot CLI both build one of these and share it behind an
/// [`Arc`].
pub struct Mill {
  /// Configuration the services were built from
  pub config:     Config,
  /// Processed-paper history
  pub history:    Arc<HistoryStore>,
  /// Artifact directories
  pub store:      Arc<ArtifactStore>,
  /// Single-paper analysis pipeline
  pub analyzer:   Analyzer,
  /// Job status for the current background run
  pub tracker:    JobTracker,
  /// Outbound delivery
  pub courier:    Courier,
  /// Paper search
  pub search:     Arc<dyn PaperSearch>,
  /// Completion client used for translation, if credentials were configured
  pub translator: Option<Arc<dyn llm::Completion>>,
}

impl Mill {
  /// Opens the stores under the configured data directory and builds the HTTP collaborators.
  ///
  /// Missing parser or language-model settings are not an error here: the analyzer is built
  /// without that collaborator and reports the gap on every paper it is asked to analyze.
  pub async fn from_config(config: Config) -> Result<Self> {
    let history = Arc::new(HistoryStore::open(config.history_path()).await?);
    let store = Arc::new(ArtifactStore::open(config.artifacts_path(), history.clone()).await?);

    let source: Arc<dyn download::DocumentSource> =
      Arc::new(download::HttpSource::new(config.http_timeout(), config.retries)?);
    let parser = match &config.parser.url {
      Some(url) => Some(Arc::new(parser::HttpParser::new(
        url,
        Duration::from_secs(config.parser.timeout_secs),
        config.retries,
      )?) as Arc<dyn parser::DocumentParser>),
      None => {
        warn!("No PDF parser URL configured, analysis will produce diagnostics");
        None
      },
    };
    let completion = llm::ChatClient::from_config(&config.llm, &config.llm.model, config.retries)?
      .map(|client| Arc::new(client) as Arc<dyn llm::Completion>);
    let translator =
      llm::ChatClient::from_config(&config.llm, &config.llm.translation_model, config.retries)?
        .map(|client| {
          Arc::new(client.with_extra("translation_options", translate::translation_options()))
            as Arc<dyn llm::Completion>
        });
    if completion.is_none() {
      warn!("No language model API key configured, analysis will be skipped");
    }

    let analyzer = Analyzer::builder()
      .with_source(source)
      .with_parser(parser)
      .with_completion(completion)
      .with_store(store.clone())
      .with_public_url(&config.public_url)
      .with_prompt(config.prompt()?)
      .with_scratch_dir(config.scratch_path())
      .build()?;

    let courier = delivery::from_config(&config)?;
    let search: Arc<dyn PaperSearch> = Arc::new(search::ArxivSearch::from_config(&config)?);

    Ok(Self {
      config,
      history,
      store,
      analyzer,
      tracker: JobTracker::new(),
      courier,
      search,
      translator,
    })
  }
}
