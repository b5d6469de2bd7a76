//! Job status tracking for background runs.
//!
//! A [`JobTracker`] holds the one authoritative `{status, message}` pair that polling clients
//! read. Starting a run hands back a [`JobHandle`]. Only that handle can move the tracker
//! forward, and only until the run finishes or a newer run starts:
//!
//! ```text
//! idle ──start──▶ running ──finish──▶ success | review_ready | error
//!                    ▲                               │
//!                    └────────────start──────────────┘
//! ```
//!
//! Reading the status never waits on a running job.

use std::{
  future::Future,
  sync::{Mutex, MutexGuard, PoisonError},
};

use super::*;

/// Message shown before any run has started.
pub const IDLE_MESSAGE: &str = "The service is idle.";

/// Phase of the current (or most recent) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
  /// Nothing has run yet
  Idle,
  /// A run is in progress
  Running,
  /// A fetch finished and its results await the user's selection
  ReviewReady,
  /// The run finished successfully
  Success,
  /// The run failed
  Error,
}

/// States a run may finish in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
  /// See [`JobState::ReviewReady`]
  ReviewReady,
  /// See [`JobState::Success`]
  Success,
  /// See [`JobState::Error`]
  Error,
}

impl From<Terminal> for JobState {
  fn from(terminal: Terminal) -> Self {
    match terminal {
      Terminal::ReviewReady => JobState::ReviewReady,
      Terminal::Success => JobState::Success,
      Terminal::Error => JobState::Error,
    }
  }
}

impl Display for JobState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      JobState::Idle => write!(f, "idle"),
      JobState::Running => write!(f, "running"),
      JobState::ReviewReady => write!(f, "review_ready"),
      JobState::Success => write!(f, "success"),
      JobState::Error => write!(f, "error"),
    }
  }
}

/// Snapshot of the tracker, serialized as `{"status": "...", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
  /// Current phase
  pub status:  JobState,
  /// Free-text progress or result message
  pub message: String,
}

/// Tracker state guarded by the mutex.
#[derive(Debug)]
struct Inner {
  /// Current snapshot
  status: JobStatus,
  /// Number of runs started so far; identifies the run a handle belongs to
  run:    u64,
}

/// The single status record for background runs.
///
/// Cloning a tracker yields another view of the same record.
///
/// # Examples
///
/// ```
/// use papermill::status::{JobState, JobTracker, Terminal};
///
/// let tracker = JobTracker::new();
/// let handle = tracker.start("Fetching papers...").unwrap();
/// assert!(tracker.start("Another run").is_err());
///
/// handle.update("Found 12 papers");
/// handle.finish(Terminal::ReviewReady, "Found 12 papers. Ready for review.");
/// assert_eq!(tracker.read().status, JobState::ReviewReady);
/// ```
#[derive(Debug, Clone)]
pub struct JobTracker {
  /// Shared state
  inner: Arc<Mutex<Inner>>,
}

impl Default for JobTracker {
  fn default() -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        status: JobStatus { status: JobState::Idle, message: IDLE_MESSAGE.to_string() },
        run:    0,
      })),
    }
  }
}

impl JobTracker {
  /// Creates an idle tracker.
  pub fn new() -> Self { Self::default() }

  /// Starts a new run.
  ///
  /// Fails with [`MillError::Conflict`] while another run is in progress, in which case the
  /// tracker is left exactly as it was.
  pub fn start(&self, message: &str) -> Result<JobHandle> {
    let mut inner = self.lock();
    if inner.status.status == JobState::Running {
      debug!("Rejected start while running: {}", inner.status.message);
      return Err(MillError::Conflict(inner.status.message.clone()));
    }
    inner.run += 1;
    inner.status = JobStatus { status: JobState::Running, message: message.to_string() };
    info!("Started run {}: {message}", inner.run);
    Ok(JobHandle { tracker: self.clone(), run: inner.run })
  }

  /// The current status.
  pub fn read(&self) -> JobStatus { self.lock().status.clone() }

  /// Whether a run is in progress.
  pub fn is_running(&self) -> bool { self.lock().status.status == JobState::Running }

  /// Locks the state, recovering from poisoning.
  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Capability to advance one run of a [`JobTracker`].
///
/// Updates through a handle whose run has finished, or has been superseded by a newer run,
/// are ignored.
#[derive(Debug, Clone)]
pub struct JobHandle {
  /// Tracker this handle advances
  tracker: JobTracker,
  /// Run this handle belongs to
  run:     u64,
}

impl JobHandle {
  /// Replaces the progress message of a running job.
  pub fn update(&self, message: &str) {
    let mut inner = self.tracker.lock();
    if !self.is_current(&inner) {
      debug!("Ignoring update from finished run {}: {message}", self.run);
      return;
    }
    inner.status.message = message.to_string();
  }

  /// Moves the run to a terminal state.
  pub fn finish(&self, terminal: Terminal, message: &str) {
    let mut inner = self.tracker.lock();
    if !self.is_current(&inner) {
      debug!("Ignoring finish from finished run {}: {message}", self.run);
      return;
    }
    inner.status = JobStatus { status: terminal.into(), message: message.to_string() };
    match terminal {
      Terminal::Error => warn!("Run {} failed: {message}", self.run),
      _ => info!("Run {} finished: {message}", self.run),
    }
  }

  /// Whether this handle's run is the one in progress.
  fn is_current(&self, inner: &Inner) -> bool {
    inner.run == self.run && inner.status.status == JobState::Running
  }

  /// Runs `job` on the Tokio runtime and finishes this run with its outcome.
  ///
  /// An `Ok((state, message))` finishes in that state. An `Err` finishes in
  /// [`Terminal::Error`] with the error's message. If the task panics the run is still
  /// finished with an error, so the tracker can never stay `running` forever.
  pub fn spawn<F>(self, job: F) -> tokio::task::JoinHandle<()>
  where F: Future<Output = Result<(Terminal, String)>> + Send + 'static {
    let task = tokio::spawn(job);
    tokio::spawn(async move {
      match task.await {
        Ok(Ok((terminal, message))) => self.finish(terminal, &message),
        Ok(Err(e)) => self.finish(Terminal::Error, &e.to_string()),
        Err(e) => {
          error!("Background task for run {} aborted: {e}", self.run);
          self.finish(Terminal::Error, "Background task crashed unexpectedly.");
        },
      }
    })
  }
}

/// Receiver of human-readable progress messages.
///
/// The pipeline and the batch runner report through this trait and never read job status
/// themselves.
pub trait ProgressSink: Send + Sync {
  /// Reports the start of a new phase.
  fn report(&self, message: &str);
}

impl ProgressSink for JobHandle {
  fn report(&self, message: &str) { self.update(message) }
}

impl<F> ProgressSink for F
where F: Fn(&str) + Send + Sync
{
  fn report(&self, message: &str) { self(message) }
}

/// A sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
  fn report(&self, message: &str) { info!("{message}") }
}

#[cfg(test)]
mod tests {
  use tokio_test::{assert_err, assert_ok};

  use super::*;

  #[test]
  fn test_starts_idle() {
    let status = JobTracker::new().read();
    assert_eq!(status.status, JobState::Idle);
    assert_eq!(status.message, IDLE_MESSAGE);
  }

  #[traced_test]
  #[test]
  fn test_start_while_running_conflicts_without_mutation() {
    let tracker = JobTracker::new();
    let handle = assert_ok!(tracker.start("Analyzing paper 1/3"));

    let err = assert_err!(tracker.start("Second run"));
    assert!(matches!(err, MillError::Conflict(ref msg) if msg == "Analyzing paper 1/3"));
    assert_eq!(tracker.read(), JobStatus {
      status:  JobState::Running,
      message: "Analyzing paper 1/3".to_string(),
    });
    handle.update("Analyzing paper 2/3");
    assert_eq!(tracker.read().message, "Analyzing paper 2/3");
  }

  #[traced_test]
  #[test]
  fn test_restart_after_terminal_state() {
    let tracker = JobTracker::new();
    let first = tracker.start("first").unwrap();
    first.finish(Terminal::Error, "boom");
    assert_eq!(tracker.read().status, JobState::Error);

    let second = tracker.start("second").unwrap();
    assert_eq!(tracker.read().status, JobState::Running);

    // A stale handle cannot touch the new run.
    first.update("stale update");
    first.finish(Terminal::Success, "stale finish");
    assert_eq!(tracker.read().message, "second");
    assert!(logs_contain("Ignoring update from finished run 1"));

    second.finish(Terminal::Success, "done");
    assert_eq!(tracker.read().status, JobState::Success);
  }

  #[test]
  fn test_finish_only_once() {
    let tracker = JobTracker::new();
    let handle = tracker.start("go").unwrap();
    handle.finish(Terminal::ReviewReady, "Found 3 papers. Ready for review.");
    handle.finish(Terminal::Error, "late");
    handle.update("later");
    assert_eq!(tracker.read(), JobStatus {
      status:  JobState::ReviewReady,
      message: "Found 3 papers. Ready for review.".to_string(),
    });
  }

  #[test]
  fn test_status_serialization() {
    let status = JobStatus { status: JobState::ReviewReady, message: "m".into() };
    let json = serde_json::to_string(&status).unwrap();
    assert_eq!(json, r#"{"status":"review_ready","message":"m"}"#);
  }

  #[test]
  fn test_closure_sink() {
    let seen = Mutex::new(Vec::new());
    let sink = |message: &str| seen.lock().unwrap().push(message.to_string());
    sink.report("one");
    sink.report("two");
    assert_eq!(*seen.lock().unwrap(), ["one", "two"]);
  }

  #[traced_test]
  #[tokio::test]
  async fn test_spawn_finishes_with_result() {
    let tracker = JobTracker::new();
    let handle = tracker.start("working").unwrap();
    handle
      .spawn(async { Ok((Terminal::Success, "Process complete.".to_string())) })
      .await
      .unwrap();
    assert_eq!(tracker.read().status, JobState::Success);

    let handle = tracker.start("working").unwrap();
    handle.spawn(async { Err(MillError::Delivery("relay down".into())) }).await.unwrap();
    assert_eq!(tracker.read().message, "Delivery failed: relay down");
  }

  #[traced_test]
  #[tokio::test]
  async fn test_spawn_recovers_from_panic() {
    let tracker = JobTracker::new();
    let handle = tracker.start("working").unwrap();
    handle
      .spawn(async {
        if true {
          panic!("collaborator exploded");
        }
        Ok((Terminal::Success, String::new()))
      })
      .await
      .unwrap();
    assert_eq!(tracker.read().status, JobState::Error);
    assert!(logs_contain("aborted"));
  }
}
