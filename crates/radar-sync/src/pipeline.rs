//! Seen-filter, scoring gate, tier classification and ledger writes for one batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use radar_adapters::{ScoreError, Scorer, ScoringContext};
use radar_core::{Assessment, CandidateProfile, Listing, Score, Tier};
use radar_storage::{Ledger, LedgerEntry, RadarState};
use tokio::sync::watch;
use tracing::{debug, warn};

pub const DEFAULT_SAVE_THRESHOLD: u8 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub min_score: Score,
    pub save_threshold: Score,
    /// Cap on new listings per batch while bootstrapping.
    pub initial_limit: usize,
    pub score_timeout: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_score: Score::MIN,
            save_threshold: Score::from_percent(DEFAULT_SAVE_THRESHOLD.into()),
            initial_limit: 20,
            score_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// A listing that passed the gate, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedListing {
    pub listing: Listing,
    pub assessment: Assessment,
    pub tier: Tier,
}

/// Loop-level events a renderer may surface as transient status.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'a> {
    Polling { source: &'a str },
    NoNewListings { source: &'a str },
    Scoring { remaining: usize, title: &'a str },
    FetchFailed { source: &'a str, error: &'a str },
}

/// Rendering collaborator.
pub trait ListingSink {
    fn accepted(&mut self, accepted: &AcceptedListing);

    fn progress(&mut self, _event: Progress<'_>) {}
}

/// Process-lifetime counters for live status. Never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadarCounters {
    pub rare: u64,
    pub strong: u64,
    pub solid: u64,
    pub low: u64,
    pub saved: u64,
    pub scored: u64,
    pub discarded: u64,
    pub scoring_failures: u64,
}

impl RadarCounters {
    pub fn record_tier(&mut self, tier: Tier) {
        match tier {
            Tier::Rare => self.rare += 1,
            Tier::Strong => self.strong += 1,
            Tier::Solid => self.solid += 1,
            Tier::Low => self.low += 1,
        }
    }

    pub fn tier(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Rare => self.rare,
            Tier::Strong => self.strong,
            Tier::Solid => self.solid,
            Tier::Low => self.low,
        }
    }

    pub fn emitted(&self) -> u64 {
        Tier::ALL.iter().map(|t| self.tier(*t)).sum()
    }
}

/// Outcome of one [`AcceptancePipeline::process_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub fresh: usize,
    pub emitted: usize,
    pub discarded: usize,
    pub saved: usize,
    /// Shutdown arrived before every fresh listing was handled.
    pub interrupted: bool,
}

/// True once shutdown was requested or its sender is gone.
pub(crate) fn stop_requested(shutdown: Option<&watch::Receiver<bool>>) -> bool {
    shutdown.is_some_and(|rx| *rx.borrow() || rx.has_changed().is_err())
}

/// Resolves when [`stop_requested`] would return true; never without a receiver.
pub(crate) async fn shutdown_signal(shutdown: Option<&watch::Receiver<bool>>) {
    match shutdown {
        Some(rx) => {
            let mut rx = rx.clone();
            let _ = rx.wait_for(|stop| *stop).await;
        }
        None => std::future::pending().await,
    }
}

enum Scored {
    Assessed(Assessment),
    Failed,
    Interrupted,
}

struct ScoringSetup {
    scorer: Arc<dyn Scorer>,
    profile: CandidateProfile,
}

pub struct AcceptancePipeline {
    settings: PipelineSettings,
    scoring: Option<ScoringSetup>,
    ledger: Ledger,
}

impl AcceptancePipeline {
    pub fn new(settings: PipelineSettings, ledger: Ledger) -> Self {
        Self {
            settings,
            scoring: None,
            ledger,
        }
    }

    /// Enable scoring. Ignored when the profile carries no resume.
    pub fn with_scoring(mut self, scorer: Arc<dyn Scorer>, profile: CandidateProfile) -> Self {
        if profile.has_resume() {
            self.scoring = Some(ScoringSetup { scorer, profile });
        } else {
            warn!("scoring requested without a resume; scoring disabled");
        }
        self
    }

    pub fn scoring_enabled(&self) -> bool {
        self.scoring.is_some()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one fetched batch through the pipeline, in fetch order.
    ///
    /// Each identifier is marked seen before it is scored. Nothing here is
    /// fatal: scorer and ledger failures are logged and the batch continues.
    /// On shutdown the batch stops between listings, or abandons the score in
    /// flight; listings not yet reached stay unseen.
    pub async fn process_batch(
        &self,
        state: &mut RadarState,
        listings: Vec<Listing>,
        first_run: bool,
        counters: &mut RadarCounters,
        sink: &mut dyn ListingSink,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> BatchSummary {
        let mut fresh: Vec<Listing> = listings
            .into_iter()
            .filter(|listing| !state.seen.contains(&listing.id))
            .collect();
        if first_run && fresh.len() > self.settings.initial_limit {
            debug!(
                kept = self.settings.initial_limit,
                dropped = fresh.len() - self.settings.initial_limit,
                "bootstrap batch truncated"
            );
            fresh.truncate(self.settings.initial_limit);
        }

        let mut summary = BatchSummary {
            fresh: fresh.len(),
            ..Default::default()
        };
        let total = fresh.len();

        for (index, listing) in fresh.into_iter().enumerate() {
            if stop_requested(shutdown) {
                summary.interrupted = true;
                break;
            }
            if !state.seen.insert(listing.id.clone()) {
                continue;
            }

            let assessment = match &self.scoring {
                Some(setup) => {
                    sink.progress(Progress::Scoring {
                        remaining: total - index,
                        title: &listing.title,
                    });
                    let assessment = match self.assess(setup, &listing, shutdown).await {
                        Scored::Assessed(assessment) => {
                            counters.scored += 1;
                            assessment
                        }
                        Scored::Failed => {
                            counters.scoring_failures += 1;
                            Assessment::unavailable()
                        }
                        Scored::Interrupted => {
                            debug!(title = %listing.title, "scoring abandoned on shutdown");
                            summary.interrupted = true;
                            break;
                        }
                    };
                    if assessment.score < self.settings.min_score {
                        counters.discarded += 1;
                        summary.discarded += 1;
                        continue;
                    }
                    assessment
                }
                None => Assessment::unscored(),
            };

            let tier = Tier::classify(assessment.score);
            counters.record_tier(tier);
            let accepted = AcceptedListing {
                listing,
                assessment,
                tier,
            };
            sink.accepted(&accepted);
            summary.emitted += 1;

            if accepted.assessment.score >= self.settings.save_threshold
                && !state.saved.contains(&accepted.listing.id)
            {
                let entry = LedgerEntry {
                    recorded_at: Local::now().fixed_offset(),
                    listing: &accepted.listing,
                    assessment: &accepted.assessment,
                };
                match self.ledger.append(&entry).await {
                    Ok(()) => {
                        state.saved.insert(accepted.listing.id.clone());
                        counters.saved += 1;
                        summary.saved += 1;
                    }
                    Err(err) => {
                        warn!(
                            id = %accepted.listing.id,
                            error = %format!("{err:#}"),
                            "ledger append failed"
                        );
                    }
                }
            }
        }

        summary
    }

    /// A timeout counts as a scorer failure.
    async fn assess(
        &self,
        setup: &ScoringSetup,
        listing: &Listing,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Scored {
        let context = ScoringContext::now();
        let call = async {
            let call = setup.scorer.score(listing, &setup.profile, &context);
            match self.settings.score_timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(ScoreError::Timeout {
                        seconds: limit.as_secs(),
                    })),
                None => call.await,
            }
        };
        let reply = tokio::select! {
            reply = call => reply,
            _ = shutdown_signal(shutdown) => return Scored::Interrupted,
        };

        match reply {
            Ok(reply) => Scored::Assessed(Assessment {
                score: Score::normalize(reply.score),
                rationale: reply.rationale,
            }),
            Err(err) => {
                warn!(scorer = setup.scorer.name(), title = %listing.title, error = %err, "scoring failed");
                Scored::Failed
            }
        }
    }
}
