//! Paper search against the arXiv API.
//!
//! A [`SearchQuery`] names categories, keywords and a [`DateRange`]. [`ArxivSearch`] turns it into
//! an arXiv query string such as
//!
//! ```text
//! (cat:cs.AI OR cat:cs.LG) AND (ti:"agents" OR abs:"agents") AND submittedDate:[202401010000 TO 202402012359]
//! ```
//!
//! and parses the Atom feed that comes back into [`Paper`]s, newest first and without duplicate
//! identifiers.

use chrono::Months;
use quick_xml::{
  events::{BytesStart, Event},
  Reader,
};

use super::*;

/// Something that can look papers up.
#[async_trait]
pub trait PaperSearch: Send + Sync {
  /// Runs `query`, returning matching papers without duplicate identifiers.
  async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>>;

  /// Categories searched when a query names none.
  fn default_categories(&self) -> Vec<String> { Vec::new() }
}

/// How far back a search reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateRange {
  /// No date restriction; the newest submissions come first anyway
  #[default]
  #[serde(rename = "recent")]
  Recent,
  /// The last month
  #[serde(rename = "last_month")]
  LastMonth,
  /// The last three months
  #[serde(rename = "last_3_months")]
  Last3Months,
  /// The last year
  #[serde(rename = "last_year")]
  LastYear,
  /// The last two years
  #[serde(rename = "last_2_years")]
  Last2Years,
}

impl DateRange {
  /// Months covered, or `None` for an unrestricted search.
  fn months(self) -> Option<u32> {
    match self {
      Self::Recent => None,
      Self::LastMonth => Some(1),
      Self::Last3Months => Some(3),
      Self::LastYear => Some(12),
      Self::Last2Years => Some(24),
    }
  }

  /// The `submittedDate` clause for a range ending on `today`.
  pub fn clause(self, today: NaiveDate) -> Option<String> {
    let start = today.checked_sub_months(Months::new(self.months()?))?;
    Some(format!(
      "submittedDate:[{}0000 TO {}2359]",
      start.format("%Y%m%d"),
      today.format("%Y%m%d")
    ))
  }
}

impl FromStr for DateRange {
  type Err = MillError;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim() {
      "" | "recent" => Ok(Self::Recent),
      "last_month" => Ok(Self::LastMonth),
      "last_3_months" => Ok(Self::Last3Months),
      "last_year" => Ok(Self::LastYear),
      "last_2_years" => Ok(Self::Last2Years),
      other => Err(MillError::InvalidRequest(format!("unknown date range {other:?}"))),
    }
  }
}

impl Display for DateRange {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Self::Recent => "recent",
      Self::LastMonth => "last_month",
      Self::Last3Months => "last_3_months",
      Self::LastYear => "last_year",
      Self::Last2Years => "last_2_years",
    };
    f.write_str(name)
  }
}

/// What to search for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
  /// arXiv categories; empty means the searcher's defaults
  pub categories: Vec<String>,
  /// Phrases matched against titles and abstracts
  pub keywords:   Vec<String>,
  /// How far back to search
  pub date_range: DateRange,
}

impl SearchQuery {
  /// An unrestricted query over the default categories.
  pub fn new() -> Self { Self::default() }

  /// Adds a category.
  pub fn with_category(mut self, category: &str) -> Self {
    self.categories.push(category.to_string());
    self
  }

  /// Adds a keyword phrase.
  pub fn with_keyword(mut self, keyword: &str) -> Self {
    self.keywords.push(keyword.to_string());
    self
  }

  /// Sets the date range.
  pub fn with_date_range(mut self, date_range: DateRange) -> Self {
    self.date_range = date_range;
    self
  }

  /// The categories this query covers, falling back to `defaults`.
  pub fn categories_or<'a>(&'a self, defaults: &'a [String]) -> &'a [String] {
    if self.categories.is_empty() {
      defaults
    } else {
      &self.categories
    }
  }

  /// Builds the arXiv `search_query` string.
  pub fn to_query(&self, defaults: &[String], today: NaiveDate) -> String {
    let categories = self
      .categories_or(defaults)
      .iter()
      .map(|c| format!("cat:{c}"))
      .collect::<Vec<_>>()
      .join(" OR ");
    let mut query = format!("({categories})");

    let keywords: Vec<String> = self
      .keywords
      .iter()
      .map(|k| k.trim())
      .filter(|k| !k.is_empty())
      .map(|k| format!("ti:\"{k}\" OR abs:\"{k}\""))
      .collect();
    if !keywords.is_empty() {
      query.push_str(&format!(" AND ({})", keywords.join(" OR ")));
    }
    if let Some(clause) = self.date_range.clause(today) {
      query.push_str(&format!(" AND {clause}"));
    }
    query
  }
}

/// Client for the arXiv Atom API.
#[derive(Debug, Clone)]
pub struct ArxivSearch {
  /// Query endpoint
  endpoint:           Url,
  /// Categories used when a query names none
  default_categories: Vec<String>,
  /// `max_results` sent with every query
  limit:              usize,
  /// Client with the configured timeout
  client:             reqwest::Client,
  /// Extra attempts for transient failures
  retries:            u32,
}

impl ArxivSearch {
  /// Builds a client from the `[search]` section and the shared HTTP settings of `config`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let endpoint = Url::parse(&config.search.endpoint).map_err(|e| {
      MillError::Config(format!("invalid search endpoint {:?}: {e}", config.search.endpoint))
    })?;
    Ok(Self {
      endpoint,
      default_categories: config.search.default_categories.clone(),
      limit: config.search.limit,
      client: retry::client(config.http_timeout())?,
      retries: config.retries,
    })
  }
}

#[async_trait]
impl PaperSearch for ArxivSearch {
  async fn search(&self, query: &SearchQuery) -> Result<Vec<Paper>> {
    if query.categories_or(&self.default_categories).is_empty() {
      return Err(MillError::InvalidRequest("no categories to search".to_string()));
    }
    let search_query = query.to_query(&self.default_categories, Utc::now().date_naive());
    info!("Executing arXiv query (limit {}): {search_query}", self.limit);

    let limit = self.limit.to_string();
    let params = [
      ("search_query", search_query.as_str()),
      ("start", "0"),
      ("max_results", limit.as_str()),
      ("sortBy", "submittedDate"),
      ("sortOrder", "descending"),
    ];
    let params = &params;
    let feed = retry::with_backoff("arXiv search", self.retries, || async move {
      let response = self.client.get(self.endpoint.clone()).query(params).send().await?;
      Ok(response.error_for_status()?.text().await?)
    })
    .await?;

    let papers = dedupe(parse_feed(&feed)?);
    debug!("arXiv returned {} unique papers", papers.len());
    Ok(papers)
  }

  fn default_categories(&self) -> Vec<String> { self.default_categories.clone() }
}

/// Removes repeated identifiers, keeping the first occurrence.
pub fn dedupe(papers: Vec<Paper>) -> Vec<Paper> {
  let mut seen = std::collections::BTreeSet::new();
  papers.into_iter().filter(|p| seen.insert(p.entry_id.clone())).collect()
}

/// Maps each of `categories` to the papers tagged with it, leaving out empty categories.
///
/// A paper tagged with several requested categories appears under each of them.
pub fn group_by_category(papers: &[Paper], categories: &[String]) -> BTreeMap<String, Vec<Paper>> {
  categories
    .iter()
    .filter_map(|category| {
      let matching: Vec<Paper> =
        papers.iter().filter(|p| p.categories.contains(category)).cloned().collect();
      (!matching.is_empty()).then(|| (category.clone(), matching))
    })
    .collect()
}

/// Text field of an Atom entry currently being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
  /// `<id>`
  Id,
  /// `<title>`
  Title,
  /// `<summary>`
  Summary,
  /// `<published>`
  Published,
  /// `<author><name>`
  AuthorName,
}

/// Fields collected from one `<entry>`.
#[derive(Debug, Default)]
struct Entry {
  /// Abstract page URL
  id:         String,
  /// Title, possibly spread over several lines
  title:      String,
  /// Abstract
  summary:    String,
  /// RFC 3339 timestamp
  published:  String,
  /// Author names
  authors:    Vec<String>,
  /// `link[title=pdf]` href
  pdf_url:    Option<String>,
  /// Category terms
  categories: Vec<String>,
}

impl Entry {
  /// Appends text to `field`.
  fn push(&mut self, field: Field, text: &str) {
    match field {
      Field::Id => self.id.push_str(text),
      Field::Title => self.title.push_str(text),
      Field::Summary => self.summary.push_str(text),
      Field::Published => self.published.push_str(text),
      Field::AuthorName => {
        if let Some(name) = self.authors.last_mut() {
          name.push_str(text);
        }
      },
    }
  }

  /// Reads the attributes of `<link>` and `<category>` elements.
  fn attributes(&mut self, element: &BytesStart) {
    match element.local_name().as_ref() {
      b"link" if attribute(element, b"title").as_deref() == Some("pdf") => {
        self.pdf_url = attribute(element, b"href");
      },
      b"category" => {
        if let Some(term) = attribute(element, b"term") {
          self.categories.push(term);
        }
      },
      _ => {},
    }
  }

  /// Converts the collected fields into a [`Paper`].
  fn finish(self) -> Result<Paper> {
    let id = self.id.trim();
    if id.is_empty() {
      return Err(MillError::ApiError("feed entry without an id".to_string()));
    }
    let published = DateTime::parse_from_rfc3339(self.published.trim())
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|e| MillError::ApiError(format!("invalid published date for {id}: {e}")))?;
    let title = self.title.split_whitespace().collect::<Vec<_>>().join(" ");
    let pdf_url = self.pdf_url.unwrap_or_else(|| id.replace("/abs/", "/pdf/"));

    let mut paper = Paper::new(id, &title)
      .with_summary(self.summary.trim())
      .with_pdf_url(&pdf_url)
      .with_published(published);
    for author in &self.authors {
      paper = paper.with_author(author.trim());
    }
    for category in &self.categories {
      paper = paper.with_category(category);
    }
    Ok(paper)
  }
}

/// Value of attribute `key` on `element`.
fn attribute(element: &BytesStart, key: &[u8]) -> Option<String> {
  element
    .attributes()
    .flatten()
    .find(|attr| attr.key.as_ref() == key)
    .and_then(|attr| attr.unescape_value().ok())
    .map(|value| value.into_owned())
}

/// Parses an arXiv Atom feed.
///
/// Entries that cannot be converted are logged and skipped. A feed that is not well-formed XML
/// is an error.
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>> {
  let mut reader = Reader::from_str(xml);
  reader.config_mut().trim_text(true);

  let mut papers = Vec::new();
  let mut entry: Option<Entry> = None;
  let mut field: Option<Field> = None;
  let mut in_author = false;

  loop {
    match reader.read_event()? {
      Event::Start(element) => {
        let Some(current) = entry.as_mut() else {
          if element.local_name().as_ref() == b"entry" {
            entry = Some(Entry::default());
          }
          continue;
        };
        field = match element.local_name().as_ref() {
          b"author" => {
            in_author = true;
            None
          },
          b"name" if in_author => {
            current.authors.push(String::new());
            Some(Field::AuthorName)
          },
          b"id" => Some(Field::Id),
          b"title" => Some(Field::Title),
          b"summary" => Some(Field::Summary),
          b"published" => Some(Field::Published),
          _ => {
            current.attributes(&element);
            None
          },
        };
      },
      Event::Empty(element) =>
        if let Some(current) = entry.as_mut() {
          current.attributes(&element);
        },
      Event::Text(text) =>
        if let (Some(current), Some(field)) = (entry.as_mut(), field) {
          let text = text
            .unescape()
            .map_err(|e| MillError::ApiError(format!("invalid text in feed: {e}")))?;
          current.push(field, &text);
        },
      Event::End(element) => {
        field = None;
        match element.local_name().as_ref() {
          b"author" => in_author = false,
          b"entry" =>
            if let Some(finished) = entry.take() {
              match finished.finish() {
                Ok(paper) => papers.push(paper),
                Err(e) => warn!("Skipping feed entry: {e}"),
              }
            },
          _ => {},
        }
      },
      Event::Eof => break,
      _ => {},
    }
  }
  Ok(papers)
}
