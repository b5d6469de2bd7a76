//! JSON API served by `papermill serve`.
//!
//! Long-running work (fetching, batch analysis, single-paper analysis) is started through the
//! [`Mill`]'s job tracker and runs on a spawned task; the request returns `202 Accepted` at once
//! and clients poll `/api/status` or `/api/analysis-status/{paper_id}`. Only one such run can be
//! in progress, a second start is answered with `409 Conflict`.
//!
//! Errors are answered as `{"message": "..."}` with a status code derived from the
//! [`MillError`] variant, see [`ApiError`].

use std::{
  collections::HashMap,
  sync::{Mutex, MutexGuard, PoisonError},
};

use axum::{
  extract::{Path as UrlPath, Query, State},
  http::{header, StatusCode},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use papermill::{
  batch::{batch_outcome, deliver_existing},
  gallery::GalleryImage,
  search::DateRange,
  status::{JobStatus, Terminal},
  store::{ArtifactMetadata, Outcome},
  translate,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::*;

/// Number of artifacts listed by `/api/recent-analyses`.
const RECENT_LIMIT: usize = 10;

/// Result type of the request handlers.
type ApiResult<T> = core::result::Result<T, ApiError>;

/// State shared by every handler.
pub struct AppState {
  /// The pipeline services
  pub mill: Arc<Mill>,
  /// Papers found by the last fetch
  results:  Mutex<Vec<Paper>>,
  /// Diagnostics of single-paper analyses that failed, by short identifier
  failures: Mutex<HashMap<String, String>>,
}

/// Handle to the [`AppState`] held by the router.
pub type SharedState = Arc<AppState>;

impl AppState {
  /// Wraps `mill` with empty fetch results.
  pub fn new(mill: Arc<Mill>) -> SharedState {
    Arc::new(Self { mill, results: Mutex::default(), failures: Mutex::default() })
  }

  /// Locks the fetch results.
  fn results(&self) -> MutexGuard<'_, Vec<Paper>> {
    self.results.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Locks the recorded failures.
  fn failures(&self) -> MutexGuard<'_, HashMap<String, String>> {
    self.failures.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Builds the router with every API route.
pub fn router(state: SharedState) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/api/status", get(status))
    .route("/api/run-fetch", post(start_fetch))
    .route("/api/results", get(results))
    .route("/api/analyze-and-email", post(analyze_and_email))
    .route("/api/analyze-paper", post(analyze_paper))
    .route("/api/analysis-status/{paper_id}", get(analysis_status))
    .route("/api/email-result", post(email_result))
    .route("/api/images/{paper_id}/{filename}", get(image))
    .route("/api/clear-cache", post(clear_cache))
    .route("/api/recent-analyses", get(recent_analyses))
    .route("/api/all-analyses", get(all_analyses))
    .route("/api/translate", post(translate_paper))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// A [`MillError`] on its way to becoming an HTTP response.
///
/// | error | status |
/// |---|---|
/// | `NotFound` | 404 |
/// | `InvalidRequest` | 400 |
/// | `Conflict` | 409 |
/// | `Delivery`, `NoRecipients` | 502 |
/// | anything else | 500 |
#[derive(Debug)]
pub struct ApiError(MillError);

impl From<MillError> for ApiError {
  fn from(err: MillError) -> Self { Self(err) }
}

impl ApiError {
  /// Status code for the wrapped error.
  fn status(&self) -> StatusCode {
    match &self.0 {
      MillError::NotFound(_) => StatusCode::NOT_FOUND,
      MillError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
      MillError::Conflict(_) => StatusCode::CONFLICT,
      MillError::Delivery(_) | MillError::NoRecipients => StatusCode::BAD_GATEWAY,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!("Request failed with {status}: {}", self.0);
    } else {
      debug!("Request rejected with {status}: {}", self.0);
    }
    (status, Json(json!({ "message": self.0.to_string() }))).into_response()
  }
}

/// A `202 Accepted` answer.
fn accepted(message: &str) -> (StatusCode, Json<Value>) {
  (StatusCode::ACCEPTED, Json(json!({ "message": message })))
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

/// `GET /api/status`: the tracker snapshot, without side effects.
async fn status(State(state): State<SharedState>) -> Json<JobStatus> {
  Json(state.mill.tracker.read())
}

/// Body of `/api/run-fetch`. Every field may be missing or `null`.
#[derive(Debug, Default, Deserialize)]
struct FetchRequest {
  /// How far back to search
  #[serde(default)]
  date_range: Option<DateRange>,
  /// Categories to search, the configured defaults when absent
  #[serde(default)]
  categories: Option<Vec<String>>,
  /// Keywords that must appear in title or abstract
  #[serde(default)]
  keywords:   Option<Vec<String>>,
}

impl FetchRequest {
  /// The search this request asks for.
  fn into_query(self) -> SearchQuery {
    let mut query = SearchQuery::new().with_date_range(self.date_range.unwrap_or_default());
    for category in self.categories.unwrap_or_default() {
      query = query.with_category(&category);
    }
    for keyword in self.keywords.unwrap_or_default() {
      query = query.with_keyword(&keyword);
    }
    query
  }
}

/// `POST /api/run-fetch`: searches in the background and keeps the results for paging.
async fn start_fetch(
  State(state): State<SharedState>,
  Json(request): Json<FetchRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
  let handle = state.mill.tracker.start("Fetching papers...")?;
  state.results().clear();

  let query = request.into_query();
  debug!("Fetching with {query:?}");
  let job_state = state.clone();
  let progress = handle.clone();
  handle.spawn(async move {
    let report = run_fetch(job_state.mill.search.as_ref(), &query, &progress).await?;
    let outcome = report.outcome();
    *job_state.results() = report.papers;
    Ok(outcome)
  });
  Ok(accepted("Fetch process started successfully."))
}

/// Query of `/api/results`.
#[derive(Debug, Deserialize)]
struct PageQuery {
  /// One-based page number
  #[serde(default = "first_page")]
  page:     usize,
  /// Papers per page
  #[serde(default = "page_size")]
  per_page: usize,
}

/// Default page number.
fn first_page() -> usize { 1 }

/// Default page size.
fn page_size() -> usize { 50 }

/// One page of fetch results.
#[derive(Debug, Serialize)]
struct ResultsPage {
  /// Papers on this page
  papers:       Vec<Paper>,
  /// Papers across all pages
  total_papers: usize,
  /// Requested page
  page:         usize,
  /// Requested page size
  per_page:     usize,
}

/// `GET /api/results`: one page of the last fetch.
async fn results(
  State(state): State<SharedState>,
  Query(query): Query<PageQuery>,
) -> ApiResult<Json<ResultsPage>> {
  let results = state.results();
  if results.is_empty() {
    return Err(MillError::NotFound("No results available.".to_string()).into());
  }
  let start = query.page.saturating_sub(1).saturating_mul(query.per_page);
  let papers = results.iter().skip(start).take(query.per_page).cloned().collect();
  Ok(Json(ResultsPage {
    papers,
    total_papers: results.len(),
    page: query.page,
    per_page: query.per_page,
  }))
}

/// Body of `/api/analyze-and-email`.
#[derive(Debug, Deserialize)]
struct BatchRequest {
  /// Papers to analyze, in order
  #[serde(default)]
  papers: Vec<Paper>,
  /// Recipient, the configured defaults when absent
  #[serde(default)]
  email:  Option<String>,
}

/// `POST /api/analyze-and-email`: starts a batch run.
async fn analyze_and_email(
  State(state): State<SharedState>,
  Json(request): Json<BatchRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
  let BatchRequest { papers, email } = request;
  if papers.is_empty() {
    return Err(MillError::InvalidRequest("No papers selected for analysis.".to_string()).into());
  }
  let handle = state.mill.tracker.start("Analysis task started...")?;
  info!("Starting batch of {} papers", papers.len());

  let mill = state.mill.clone();
  let progress = handle.clone();
  handle.spawn(async move {
    let result = run_batch(
      &mill.analyzer,
      &mill.courier,
      &mill.history,
      &papers,
      email.as_deref(),
      &progress,
    )
    .await;
    Ok(batch_outcome(result))
  });
  Ok(accepted("Analysis process started successfully."))
}

/// Body of `/api/analyze-paper` and `/api/email-result`.
#[derive(Debug, Deserialize)]
struct PaperRequest {
  /// The paper in question
  paper: Paper,
  /// Recipient, the configured defaults when absent
  #[serde(default)]
  email: Option<String>,
}

/// `POST /api/analyze-paper`: analyzes one paper without delivering it.
async fn analyze_paper(
  State(state): State<SharedState>,
  Json(request): Json<PaperRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
  let paper = request.paper;
  let handle = state.mill.tracker.start(&format!("Analyzing {}...", paper.title))?;
  state.failures().remove(paper.short_id());

  let job_state = state.clone();
  let progress = handle.clone();
  handle.spawn(async move {
    let artifact = job_state.mill.analyzer.analyze(&paper, &progress).await;
    match artifact.outcome {
      Outcome::Failed(diagnostic) => {
        job_state.failures().insert(paper.short_id().to_string(), diagnostic.clone());
        Ok((Terminal::Error, diagnostic))
      },
      Outcome::Analyzed | Outcome::Cached =>
        Ok((Terminal::Success, format!("Analysis of {} is ready.", paper.title))),
    }
  });
  Ok(accepted("Analysis started."))
}

/// Answer of `/api/analysis-status/{paper_id}`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AnalysisStatus {
  /// The artifact exists
  Success {
    /// Rendered document
    content: String,
    /// Figures listed in the document's gallery
    images:  Vec<GalleryImage>,
  },
  /// Nothing stored yet
  Running,
  /// The last analysis of this paper produced a diagnostic
  Error {
    /// The diagnostic placeholder
    message: String,
  },
}

/// `GET /api/analysis-status/{paper_id}`
async fn analysis_status(
  State(state): State<SharedState>,
  UrlPath(paper_id): UrlPath<String>,
) -> ApiResult<Json<AnalysisStatus>> {
  match state.mill.store.read(&paper_id).await {
    Ok(artifact) => {
      let images = artifact.gallery();
      Ok(Json(AnalysisStatus::Success { content: artifact.document, images }))
    },
    Err(MillError::NotFound(_)) => match state.failures().get(&paper_id) {
      Some(message) => Ok(Json(AnalysisStatus::Error { message: message.clone() })),
      None => Ok(Json(AnalysisStatus::Running)),
    },
    Err(e) => Err(e.into()),
  }
}

/// `POST /api/email-result`: delivers a stored analysis.
async fn email_result(
  State(state): State<SharedState>,
  Json(request): Json<PaperRequest>,
) -> ApiResult<Json<Value>> {
  let mill = &state.mill;
  deliver_existing(&mill.store, &mill.courier, &request.paper, request.email.as_deref()).await?;
  info!("Emailed stored analysis of {}", request.paper.short_id());
  Ok(Json(json!({ "message": "Analysis emailed successfully." })))
}

/// `GET /api/images/{paper_id}/{filename}`
async fn image(
  State(state): State<SharedState>,
  UrlPath((paper_id, filename)): UrlPath<(String, String)>,
) -> ApiResult<Response> {
  let (bytes, content_type) = state.mill.store.resolve_image(&paper_id, &filename).await?;
  Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

/// `POST /api/clear-cache`: refused while a run is in progress.
async fn clear_cache(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
  if state.mill.tracker.is_running() {
    return Err(MillError::Conflict(state.mill.tracker.read().message).into());
  }
  let removed = state.mill.store.clear().await?;
  state.failures().clear();
  Ok(Json(json!({ "message": format!("Cleared {removed} cached analyses.") })))
}

/// Listing entry of a stored artifact.
#[derive(Debug, Serialize)]
struct AnalysisSummary {
  /// Stored metadata
  #[serde(flatten)]
  metadata: ArtifactMetadata,
  /// Key for `/api/analysis-status`
  short_id: String,
}

impl From<ArtifactMetadata> for AnalysisSummary {
  fn from(metadata: ArtifactMetadata) -> Self {
    let short_id = metadata.paper.short_id().to_string();
    Self { metadata, short_id }
  }
}

/// `GET /api/recent-analyses`
async fn recent_analyses(State(state): State<SharedState>) -> ApiResult<Json<Vec<AnalysisSummary>>> {
  let listed = state.mill.store.list(None).await?;
  Ok(Json(listed.into_iter().take(RECENT_LIMIT).map(AnalysisSummary::from).collect()))
}

/// Query of `/api/all-analyses`.
#[derive(Debug, Deserialize)]
struct ListQuery {
  /// Case-insensitive filter over identifier, title and authors
  #[serde(default)]
  query: Option<String>,
}

/// `GET /api/all-analyses?query=`
async fn all_analyses(
  State(state): State<SharedState>,
  Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<AnalysisSummary>>> {
  let listed = state.mill.store.list(query.query.as_deref()).await?;
  Ok(Json(listed.into_iter().map(AnalysisSummary::from).collect()))
}

/// Body of `/api/translate`.
#[derive(Debug, Deserialize)]
struct TranslateRequest {
  /// Original title
  #[serde(default)]
  title:         Option<String>,
  /// Original abstract
  #[serde(default, rename = "abstract")]
  abstract_text: Option<String>,
}

/// `POST /api/translate`
async fn translate_paper(
  State(state): State<SharedState>,
  Json(request): Json<TranslateRequest>,
) -> ApiResult<Json<Value>> {
  let title = request.title.unwrap_or_default();
  let abstract_text = request.abstract_text.unwrap_or_default();
  if title.trim().is_empty() || abstract_text.trim().is_empty() {
    return Err(MillError::InvalidRequest("Title and abstract are required.".to_string()).into());
  }
  let Some(translator) = &state.mill.translator else {
    return Err(MillError::Config("No translation model is configured.".to_string()).into());
  };
  let translation = translate::translate(translator.as_ref(), &title, &abstract_text).await?;
  Ok(Json(json!({
    "translated_title": translation.title,
    "translated_abstract": translation.abstract_text,
  })))
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use async_trait::async_trait;
  use axum::{body::Body, http::Request};
  use chrono::Utc;
  use papermill::{
    delivery::{Courier, Delivery, Transport},
    download::HttpSource,
    history::HistoryStore,
    pipeline::Analyzer,
    status::{JobState, JobTracker},
    store::ArtifactStore,
  };
  use tempfile::{tempdir, TempDir};
  use tower::ServiceExt;

  use super::*;

  struct CannedSearch(Vec<Paper>);

  #[async_trait]
  impl PaperSearch for CannedSearch {
    async fn search(&self, _query: &SearchQuery) -> papermill::error::Result<Vec<Paper>> {
      Ok(self.0.clone())
    }
  }

  #[derive(Default)]
  struct Recorder {
    sent: Mutex<Vec<Delivery>>,
  }

  #[async_trait]
  impl Transport for Recorder {
    async fn deliver(&self, delivery: &Delivery) -> papermill::error::Result<()> {
      self.sent.lock().unwrap().push(delivery.clone());
      Ok(())
    }
  }

  struct Echo;

  #[async_trait]
  impl Completion for Echo {
    async fn complete(&self, _prompt: &str) -> papermill::error::Result<String> {
      Ok("Title: 标题\n\nAbstract: 摘要".to_string())
    }
  }

  struct TestApp {
    app:       Router,
    state:     SharedState,
    transport: Arc<Recorder>,
    _dir:      TempDir,
  }

  fn paper(id: &str, title: &str) -> Paper {
    Paper::new(&format!("http://arxiv.org/abs/{id}"), title)
      .with_author("Grace Hopper")
      .with_category("cs.AI")
      .with_pdf_url(&format!("http://arxiv.org/pdf/{id}"))
  }

  /// An app whose analyzer has no parser, so every fresh analysis is a diagnostic.
  async fn test_app(found: Vec<Paper>) -> TestApp {
    let dir = tempdir().unwrap();
    let config = Config::default()
      .with_data_dir(dir.path())
      .with_public_url("http://mill.test")
      .with_default_recipients(&["team@example.com"]);
    let history = Arc::new(HistoryStore::open(config.history_path()).await.unwrap());
    let store =
      Arc::new(ArtifactStore::open(config.artifacts_path(), history.clone()).await.unwrap());
    let analyzer = Analyzer::builder()
      .with_source(Arc::new(HttpSource::new(Duration::from_secs(1), 0).unwrap()))
      .with_parser(None)
      .with_completion(None)
      .with_store(store.clone())
      .with_scratch_dir(config.scratch_path())
      .build()
      .unwrap();
    let transport = Arc::new(Recorder::default());
    let courier = Courier::new(transport.clone(), &config.delivery);

    let mill = Mill {
      config,
      history,
      store,
      analyzer,
      tracker: JobTracker::new(),
      courier,
      search: Arc::new(CannedSearch(found)),
      translator: Some(Arc::new(Echo)),
    };
    let state = AppState::new(Arc::new(mill));
    TestApp { app: router(state.clone()), state, transport, _dir: dir }
  }

  impl TestApp {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
      let response = self.send(method, uri, body).await;
      let status = response.status();
      let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
      (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> Response {
      let request = Request::builder().method(method).uri(uri);
      let request = match body {
        Some(body) => request
          .header(header::CONTENT_TYPE, "application/json")
          .body(Body::from(body.to_string()))
          .unwrap(),
        None => request.body(Body::empty()).unwrap(),
      };
      self.app.clone().oneshot(request).await.unwrap()
    }

    async fn wait_idle(&self) -> JobStatus {
      for _ in 0..200 {
        if !self.state.mill.tracker.is_running() {
          break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
      }
      self.state.mill.tracker.read()
    }

    async fn store_artifact(&self, paper: &Paper) {
      let store = &self.state.mill.store;
      let mut draft = store.begin(paper.short_id()).await.unwrap();
      draft.save_image("fig1.png", b"png").await.unwrap();
      let document = format!(
        "# {}\n\nBody\n\n<!-- FIGURES_GALLERY_DATA: \
         [{{\"src\":\"http://mill.test/api/images/{}/fig1.png\",\"alt\":\"fig1.png\"}}] -->",
        paper.title,
        paper.short_id()
      );
      let metadata = ArtifactMetadata {
        paper:                     paper.clone(),
        extracted_image_filenames: Vec::new(),
        analyzed_at:               Utc::now(),
      };
      store.write(draft, &document, &metadata).await.unwrap();
    }
  }

  #[tokio::test]
  async fn test_health_and_idle_status() {
    let app = test_app(Vec::new()).await;
    let (code, _) = app.call("GET", "/health", None).await;
    assert_eq!(code, StatusCode::OK);

    let (code, body) = app.call("GET", "/api/status", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "idle");
  }

  #[tokio::test]
  async fn test_fetch_then_page_results() {
    let app = test_app(vec![paper("2401.1v1", "One"), paper("2401.2v1", "Two")]).await;

    let (code, _) = app.call("GET", "/api/results", None).await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    let body = json!({ "date_range": null, "categories": ["cs.AI"], "keywords": ["agent"] });
    let (code, _) = app.call("POST", "/api/run-fetch", Some(body)).await;
    assert_eq!(code, StatusCode::ACCEPTED);

    let status = app.wait_idle().await;
    assert_eq!(status.status, JobState::ReviewReady);
    assert_eq!(status.message, "Found 2 papers. Ready for review.");

    let (code, body) = app.call("GET", "/api/results?page=2&per_page=1", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["total_papers"], 2);
    assert_eq!(body["page"], 2);
    assert_eq!(body["papers"][0]["title"], "Two");
  }

  #[tokio::test]
  async fn test_batch_start_validation() {
    let app = test_app(Vec::new()).await;

    let (code, body) = app.call("POST", "/api/analyze-and-email", Some(json!({ "papers": [] }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid request: No papers selected for analysis.");

    let _busy = app.state.mill.tracker.start("Fetching papers...").unwrap();
    let request = json!({ "papers": [paper("2401.3v1", "Three")] });
    let (code, _) = app.call("POST", "/api/analyze-and-email", Some(request)).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(app.state.mill.tracker.read().message, "Fetching papers...");
  }

  #[tokio::test]
  async fn test_batch_delivers_and_records() {
    let app = test_app(Vec::new()).await;
    let one = paper("2401.4v1", "Four");
    let request = json!({ "papers": [one], "email": "reader@example.com" });

    let (code, _) = app.call("POST", "/api/analyze-and-email", Some(request)).await;
    assert_eq!(code, StatusCode::ACCEPTED);

    let status = app.wait_idle().await;
    assert_eq!(status.status, JobState::Success);
    assert_eq!(status.message, "Process complete. Emailed 1 analyzed papers.");
    let sent = app.transport.sent.lock().unwrap();
    assert_eq!(sent[0].recipients, vec!["reader@example.com"]);
    assert!(String::from_utf8_lossy(&sent[0].attachment.bytes).contains("PDF parser"));
    drop(sent);
    assert!(app.state.mill.history.contains(&one.entry_id).await);
  }

  #[tokio::test]
  async fn test_analysis_status_and_images() {
    let app = test_app(Vec::new()).await;
    let stored = paper("2401.5v1", "Five");

    let (_, body) = app.call("GET", "/api/analysis-status/2401.5v1", None).await;
    assert_eq!(body, json!({ "status": "running" }));

    app.store_artifact(&stored).await;
    let (code, body) = app.call("GET", "/api/analysis-status/2401.5v1", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["content"].as_str().unwrap().starts_with("# Five"));
    assert_eq!(body["images"][0]["src"], "http://mill.test/api/images/2401.5v1/fig1.png");

    let response = app.send("GET", "/api/images/2401.5v1/fig1.png", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let (code, _) = app.call("GET", "/api/images/2401.5v1/missing.png", None).await;
    assert_eq!(code, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn test_failed_single_analysis_is_reported() {
    let app = test_app(Vec::new()).await;
    let request = json!({ "paper": paper("2401.6v1", "Six") });

    let (code, _) = app.call("POST", "/api/analyze-paper", Some(request)).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    assert_eq!(app.wait_idle().await.status, JobState::Error);

    let (_, body) = app.call("GET", "/api/analysis-status/2401.6v1", None).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "[Analysis Failed: PDF parser URL not configured]");
  }

  #[tokio::test]
  async fn test_email_result() {
    let app = test_app(Vec::new()).await;
    let stored = paper("2401.7v1", "Seven");
    let request = json!({ "paper": stored });

    let (code, _) = app.call("POST", "/api/email-result", Some(request.clone())).await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    app.store_artifact(&stored).await;
    let (code, _) = app.call("POST", "/api/email-result", Some(request)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(app.transport.sent.lock().unwrap()[0].recipients, vec!["team@example.com"]);
    assert!(app.state.mill.history.contains(&stored.entry_id).await);
  }

  #[tokio::test]
  async fn test_listing_and_clear() {
    let app = test_app(Vec::new()).await;
    app.store_artifact(&paper("2401.8v1", "Eight")).await;
    app.store_artifact(&paper("2401.9v1", "Nine")).await;

    let (_, body) = app.call("GET", "/api/recent-analyses", None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert!(body[0]["short_id"].is_string());

    let (_, body) = app.call("GET", "/api/all-analyses?query=nine", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["short_id"], "2401.9v1");

    let (code, body) = app.call("POST", "/api/clear-cache", None).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body["message"], "Cleared 2 cached analyses.");
    let (_, body) = app.call("GET", "/api/all-analyses", None).await;
    assert_eq!(body, json!([]));
  }

  #[tokio::test]
  async fn test_translate() {
    let app = test_app(Vec::new()).await;

    let (code, _) = app.call("POST", "/api/translate", Some(json!({ "title": "T" }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let request = json!({ "title": "Title", "abstract": "Abstract" });
    let (code, body) = app.call("POST", "/api/translate", Some(request)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, json!({ "translated_title": "标题", "translated_abstract": "摘要" }));
  }

  #[test]
  fn test_error_status_codes() {
    let status = |err: MillError| ApiError::from(err).status();
    assert_eq!(status(MillError::NotFound("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(status(MillError::InvalidRequest("x".into())), StatusCode::BAD_REQUEST);
    assert_eq!(status(MillError::Conflict("x".into())), StatusCode::CONFLICT);
    assert_eq!(status(MillError::NoRecipients), StatusCode::BAD_GATEWAY);
    assert_eq!(status(MillError::Config("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
  }
}
