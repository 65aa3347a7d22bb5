//! Core domain model for the job radar: listings, identity, scores and tiers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "radar-core";

/// Separator between title and company in the identity digest input.
const IDENTITY_DELIMITER: &str = "||";

/// Stable dedup key for a listing: hex SHA-256 of normalized title + company.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for ListingId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the identifier for a (title, company) pair.
///
/// Both fields are trimmed and lowercased first, so source, URL and
/// description wording never influence the key.
pub fn identify(title: &str, company: &str) -> ListingId {
    let base = format!(
        "{}{}{}",
        title.trim().to_lowercase(),
        IDENTITY_DELIMITER,
        company.trim().to_lowercase()
    );
    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    ListingId(hex::encode(hasher.finalize()))
}

/// A normalized job posting produced by one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub title: String,
    pub source: String,
    pub company: String,
    pub location: String,
    pub summary: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Build a listing, deriving its identifier from title and company.
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        company: impl Into<String>,
        location: impl Into<String>,
        summary: impl Into<String>,
        url: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        let title = title.into();
        let company = company.into();
        Self {
            id: identify(&title, &company),
            title,
            source: source.into(),
            company,
            location: location.into(),
            summary: summary.into(),
            url: url.into(),
            published_at,
        }
    }
}

/// Score value as returned by a scorer, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawScore {
    /// Integral reply, already a percentage.
    Integer(i64),
    /// Floating reply; values at or below 1.0 are fractions of 100.
    Float(f64),
}

/// Match quality as an integer percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Score(u8);

impl Score {
    pub const MIN: Score = Score(0);
    pub const MAX: Score = Score(100);

    /// Clamp an arbitrary percentage into range.
    pub fn from_percent(value: i64) -> Self {
        Score(value.clamp(0, 100) as u8)
    }

    pub fn normalize(raw: RawScore) -> Self {
        match raw {
            RawScore::Integer(value) => Self::from_percent(value),
            RawScore::Float(value) if value.is_nan() => Self::MIN,
            RawScore::Float(value) => {
                let percent = if value <= 1.0 { value * 100.0 } else { value };
                Self::from_percent(percent.round().clamp(0.0, 100.0) as i64)
            }
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Normalized scorer verdict attached to a listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assessment {
    pub score: Score,
    pub rationale: String,
}

impl Assessment {
    pub const UNAVAILABLE_RATIONALE: &'static str = "Scoring unavailable";

    /// Substitute verdict used when the scorer fails.
    pub fn unavailable() -> Self {
        Self {
            score: Score::MIN,
            rationale: Self::UNAVAILABLE_RATIONALE.to_string(),
        }
    }

    /// Verdict used when no scorer is configured.
    pub fn unscored() -> Self {
        Self::default()
    }
}

/// Display bucket derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// 80 and above.
    Rare,
    /// 60 to 79.
    Strong,
    /// 40 to 59.
    Solid,
    /// Below 40.
    Low,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Rare, Tier::Strong, Tier::Solid, Tier::Low];

    pub fn classify(score: Score) -> Self {
        match score.value() {
            80..=u8::MAX => Tier::Rare,
            60..=79 => Tier::Strong,
            40..=59 => Tier::Solid,
            _ => Tier::Low,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Rare => "rare",
            Tier::Strong => "strong",
            Tier::Solid => "solid",
            Tier::Low => "low",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Candidate context handed to the scorer alongside each listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub resume: String,
    #[serde(default)]
    pub goals: String,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub pay: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub evaluation_factors: String,
}

impl CandidateProfile {
    pub fn has_resume(&self) -> bool {
        !self.resume.trim().is_empty()
    }
}
