//! Source fetcher contracts, raw-record normalization, and the bundled fetchers.

mod scoring;

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use radar_core::Listing;
use radar_storage::{HttpClient, HttpError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use scoring::{
    build_prompt, parse_completion, OpenRouterScorer, ScoreError, ScoreReply, Scorer,
    ScoringContext, DEFAULT_OPENROUTER_MODEL, OPENROUTER_API_KEY_ENV, OPENROUTER_ENDPOINT,
};

pub const CRATE_NAME: &str = "radar-adapters";

const UNKNOWN: &str = "Unknown";

/// Query parameters shared by every fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    pub search_term: String,
    pub location: String,
    pub results_wanted: usize,
    pub hours_old: u32,
}

/// Loosely-typed record as delivered by a source, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_url: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date_posted: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("reading fixture {}: {error}", path.display())]
    Fixture {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("parsing {source_name} payload: {error}")]
    Parse {
        source_name: String,
        #[source]
        error: serde_json::Error,
    },
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("{source_name} did not answer within {seconds}s")]
    Timeout { source_name: String, seconds: u64 },
}

/// A job-listing source. `Ok(vec![])` means "no results", never an error.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source_name(&self) -> &str;

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawListing>, FetchError>;
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_posted(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

impl RawListing {
    /// Normalize into a [`Listing`]; records without a title or link yield `None`.
    pub fn into_listing(self, source: &str) -> Option<Listing> {
        let title = clean(self.title.as_deref())?;
        let url = clean(self.job_url.as_deref())?;
        let company = clean(self.company.as_deref()).unwrap_or_else(|| UNKNOWN.to_string());

        let parts: Vec<String> = [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .filter_map(clean)
            .collect();
        let location = if parts.is_empty() {
            clean(self.location.as_deref()).unwrap_or_else(|| UNKNOWN.to_string())
        } else {
            parts.join(", ")
        };

        Some(Listing::new(
            source,
            title,
            company,
            location,
            clean(self.description.as_deref()).unwrap_or_default(),
            url,
            parse_posted(self.date_posted.as_deref()),
        ))
    }
}

/// Normalize one fetch batch, dropping unusable records and in-batch duplicates.
pub fn normalize_batch(source: &str, raw: Vec<RawListing>) -> Vec<Listing> {
    let total = raw.len();
    let mut ids = HashSet::new();
    let listings: Vec<Listing> = raw
        .into_iter()
        .filter_map(|record| record.into_listing(source))
        .filter(|listing| ids.insert(listing.id.clone()))
        .collect();
    if listings.len() < total {
        debug!(source, total, kept = listings.len(), "dropped unusable or duplicate records");
    }
    listings
}

/// Human label for the site a listing links to.
pub fn site_label(url: &str) -> &'static str {
    const SITES: [(&str, &str); 5] = [
        ("indeed.com", "Indeed"),
        ("linkedin.com", "LinkedIn"),
        ("ziprecruiter.com", "ZipRecruiter"),
        ("glassdoor.com", "Glassdoor"),
        ("google.com", "Google"),
    ];
    SITES
        .iter()
        .find(|(host, _)| url.contains(host))
        .map(|(_, label)| *label)
        .unwrap_or("Link")
}

fn matches_search(record: &RawListing, search_term: &str) -> bool {
    let needle = search_term.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    [record.title.as_deref(), record.description.as_deref()]
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains(&needle))
}

/// Reads `<dir>/<source>.json`, a JSON array of raw records.
///
/// A missing file is treated as an empty result.
#[derive(Debug, Clone)]
pub struct FixtureFetcher {
    source_name: String,
    dir: PathBuf,
}

impl FixtureFetcher {
    pub fn new(source_name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            source_name: source_name.into(),
            dir: dir.into(),
        }
    }

    pub fn fixture_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.source_name))
    }
}

#[async_trait]
impl SourceFetcher for FixtureFetcher {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawListing>, FetchError> {
        let path = self.fixture_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "fixture missing; no results");
                return Ok(Vec::new());
            }
            Err(error) => return Err(FetchError::Fixture { path, error }),
        };
        let records: Vec<RawListing> =
            serde_json::from_str(&text).map_err(|error| FetchError::Parse {
                source_name: self.source_name.clone(),
                error,
            })?;
        Ok(records
            .into_iter()
            .filter(|record| matches_search(record, &request.search_term))
            .take(request.results_wanted)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedPayload {
    Bare(Vec<RawListing>),
    Wrapped { jobs: Vec<RawListing> },
}

/// GETs a JSON feed endpoint, passing the fetch request as query parameters.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    source_name: String,
    endpoint: String,
    http: HttpClient,
}

impl FeedFetcher {
    pub fn new(source_name: impl Into<String>, endpoint: impl Into<String>, http: HttpClient) -> Self {
        Self {
            source_name: source_name.into(),
            endpoint: endpoint.into(),
            http,
        }
    }

    pub fn parse_payload(&self, body: &[u8]) -> Result<Vec<RawListing>, FetchError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let payload: FeedPayload =
            serde_json::from_slice(body).map_err(|error| FetchError::Parse {
                source_name: self.source_name.clone(),
                error,
            })?;
        Ok(match payload {
            FeedPayload::Bare(records) => records,
            FeedPayload::Wrapped { jobs } => jobs,
        })
    }
}

#[async_trait]
impl SourceFetcher for FeedFetcher {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawListing>, FetchError> {
        let response = self
            .http
            .get_with_query(&self.source_name, &self.endpoint, request)
            .await?;
        let mut records = self.parse_payload(&response.body)?;
        records.truncate(request.results_wanted);
        Ok(records)
    }
}
