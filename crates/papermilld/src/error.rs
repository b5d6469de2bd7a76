//! Error types for the papermill binary.
//!
//! Library failures arrive as [`MillError`] and are wrapped rather than flattened, so the
//! request layer can still map them onto HTTP status codes.

use thiserror::Error;

use super::*;

/// Error type alias used for the `papermill` binary.
pub type Result<T> = core::result::Result<T, PapermilldError>;

/// Errors surfaced by the CLI commands and the server.
#[derive(Error, Debug)]
pub enum PapermilldError {
  /// An operation of the papermill library failed.
  #[error(transparent)]
  Mill(#[from] MillError),

  /// A file system or socket operation failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// An interactive prompt could not be shown or read.
  #[error(transparent)]
  Dialoguer(#[from] dialoguer::Error),

  /// The listen address could not be parsed.
  #[error(transparent)]
  Address(#[from] std::net::AddrParseError),
}
