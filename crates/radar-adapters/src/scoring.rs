use async_trait::async_trait;
use chrono::{DateTime, Local};
use radar_core::{CandidateProfile, Listing, RawScore};
use radar_storage::{HttpClient, HttpError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";
pub const DEFAULT_OPENROUTER_MODEL: &str = "x-ai/grok-4.1-fast";

const MAX_DESCRIPTION_CHARS: usize = 3000;

/// Per-call context beyond the listing and the profile.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext {
    pub now: DateTime<Local>,
}

impl ScoringContext {
    pub fn now() -> Self {
        Self { now: Local::now() }
    }
}

/// Scorer output before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReply {
    pub score: RawScore,
    pub rationale: String,
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("malformed scorer response: {0}")]
    Malformed(String),
    #[error("scorer did not answer within {seconds}s")]
    Timeout { seconds: u64 },
}

#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    async fn score(
        &self,
        listing: &Listing,
        profile: &CandidateProfile,
        context: &ScoringContext,
    ) -> Result<ScoreReply, ScoreError>;
}

/// Render the scoring prompt for one listing.
pub fn build_prompt(listing: &Listing, profile: &CandidateProfile, context: &ScoringContext) -> String {
    let description = if listing.summary.trim().is_empty() {
        "No description".to_string()
    } else {
        listing.summary.chars().take(MAX_DESCRIPTION_CHARS).collect()
    };
    let current_time = context.now.format("%A %I:%M %p");

    format!(
        "Rate how well this job fits the candidate on a 0.0-1.0 scale.

SCALE:
0.0-0.2: skip
0.2-0.4: stretch
0.4-0.6: solid
0.6-0.8: strong
0.8-1.0: rare

CURRENT TIME: {current_time}
Postings from large US employers that appear late at night or on weekends are often ghost jobs.

RESUME:
{resume}

GOALS: {goals}
SITUATION: {background}
PAY: {pay}
LOCATION: {location}
FACTORS: {factors}

JOB:
{title} at {company}
Location: {job_location}
{description}

Reply with a JSON object:
- score: 0.0-1.0
- reasoning: length depends on the score.
  * below 0.4: one short sentence
  * 0.4-0.6: two short lines marked + / -
  * 0.6-0.8: two or three lines marked + / -
  * 0.8 and above: three or four lines marked + / -
  Keep every line under 60 characters.
- should_apply: true or false",
        resume = profile.resume,
        goals = profile.goals,
        background = profile.background,
        pay = profile.pay,
        location = profile.location,
        factors = profile.evaluation_factors,
        title = listing.title,
        company = listing.company,
        job_location = listing.location,
    )
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn raw_score(value: Option<&JsonValue>) -> Result<RawScore, ScoreError> {
    match value {
        None | Some(JsonValue::Null) => Ok(RawScore::Integer(0)),
        Some(JsonValue::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(RawScore::Integer(i))
            } else {
                n.as_f64()
                    .map(RawScore::Float)
                    .ok_or_else(|| ScoreError::Malformed(format!("unrepresentable score {n}")))
            }
        }
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(RawScore::Float)
            .map_err(|_| ScoreError::Malformed(format!("non-numeric score {s:?}"))),
        Some(other) => Err(ScoreError::Malformed(format!("unexpected score {other}"))),
    }
}

/// Extract the score and reasoning from a chat-completions response body.
pub fn parse_completion(body: &[u8]) -> Result<ScoreReply, ScoreError> {
    #[derive(Deserialize)]
    struct Resp {
        choices: Vec<Choice>,
    }
    #[derive(Deserialize)]
    struct Choice {
        message: ChoiceMsg,
    }
    #[derive(Deserialize)]
    struct ChoiceMsg {
        content: Option<String>,
    }

    let resp: Resp = serde_json::from_slice(body)
        .map_err(|e| ScoreError::Malformed(format!("completion envelope: {e}")))?;
    let content = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ScoreError::Malformed("completion has no content".to_string()))?;

    let verdict: JsonValue = serde_json::from_str(strip_code_fence(&content))
        .map_err(|e| ScoreError::Malformed(format!("verdict json: {e}")))?;
    if !verdict.is_object() {
        return Err(ScoreError::Malformed("verdict is not an object".to_string()));
    }

    Ok(ScoreReply {
        score: raw_score(verdict.get("score"))?,
        rationale: verdict
            .get("reasoning")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
    })
}

/// Scores listings through the OpenRouter chat-completions API.
#[derive(Debug, Clone)]
pub struct OpenRouterScorer {
    http: HttpClient,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenRouterScorer {
    pub fn new(http: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
            endpoint: OPENROUTER_ENDPOINT.to_string(),
        }
    }

    /// Build from `OPENROUTER_API_KEY`; `None` when the key is absent or blank.
    pub fn from_env(http: HttpClient) -> Option<Self> {
        std::env::var(OPENROUTER_API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(|key| Self::new(http, key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Scorer for OpenRouterScorer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn score(
        &self,
        listing: &Listing,
        profile: &CandidateProfile,
        context: &ScoringContext,
    ) -> Result<ScoreReply, ScoreError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            response_format: ResponseFormat<'a>,
        }

        let prompt = build_prompt(listing, profile, context);
        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: &prompt,
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .http
            .post_json("openrouter", &self.endpoint, Some(&self.api_key), &req)
            .await?;
        parse_completion(&response.body)
    }
}
