//! The control loop: tick, fetch due sources, run the pipeline, persist.

use std::time::Duration;

use anyhow::Context;
use radar_adapters::{normalize_batch, FetchError, FetchRequest, RawListing, SourceFetcher};
use radar_storage::{epoch_seconds_now, RadarState, StateStore};
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::pipeline::{
    shutdown_signal, stop_requested, AcceptancePipeline, ListingSink, Progress, RadarCounters,
};
use crate::scheduler::{due_sources, SourceSchedule};

/// `Bootstrap` until the first full pass over every source completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Bootstrap,
    Steady,
}

/// A configured source: its schedule plus the fetcher that serves it.
pub struct SourceSlot {
    pub schedule: SourceSchedule,
    pub fetcher: Box<dyn SourceFetcher>,
}

impl SourceSlot {
    pub fn new(interval: Duration, fetcher: Box<dyn SourceFetcher>) -> Self {
        Self {
            schedule: SourceSchedule::new(fetcher.source_name(), interval),
            fetcher,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub tick_interval: Duration,
    pub fetch_timeout: Option<Duration>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            fetch_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Returned by [`RadarLoop::run`] after the final save.
#[derive(Debug, Clone)]
pub struct RadarOutcome {
    pub state: RadarState,
    pub counters: RadarCounters,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub polled: Vec<String>,
    pub failed: Vec<String>,
    pub fresh: usize,
    pub emitted: usize,
    pub saved: usize,
    pub interrupted: bool,
}

pub struct RadarLoop {
    slots: Vec<SourceSlot>,
    request: FetchRequest,
    store: StateStore,
    state: RadarState,
    pipeline: AcceptancePipeline,
    counters: RadarCounters,
    phase: LoopPhase,
    settings: LoopSettings,
}

impl RadarLoop {
    /// Starts in `Bootstrap` when the loaded state has never seen a listing.
    pub fn new(
        slots: Vec<SourceSlot>,
        request: FetchRequest,
        store: StateStore,
        state: RadarState,
        pipeline: AcceptancePipeline,
        settings: LoopSettings,
    ) -> Self {
        let phase = if state.seen.is_empty() {
            LoopPhase::Bootstrap
        } else {
            LoopPhase::Steady
        };
        Self {
            slots,
            request,
            store,
            state,
            pipeline,
            counters: RadarCounters::default(),
            phase,
            settings,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn state(&self) -> &RadarState {
        &self.state
    }

    pub fn counters(&self) -> &RadarCounters {
        &self.counters
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.schedule.name.as_str()).collect()
    }

    /// Evaluate every source once, fetching and processing those that are due.
    ///
    /// State is saved after each source's batch. Shutdown is honored before each
    /// fetch, during it, and between listings of a batch; an abandoned fetch is
    /// not recorded as a poll, and an interrupted pass does not end the
    /// bootstrap phase.
    pub async fn tick(
        &mut self,
        sink: &mut dyn ListingSink,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> TickSummary {
        let first_run = self.phase == LoopPhase::Bootstrap;
        let schedules: Vec<SourceSchedule> =
            self.slots.iter().map(|s| s.schedule.clone()).collect();
        let due = due_sources(epoch_seconds_now(), &schedules, &self.state.last_poll, first_run);
        let mut summary = TickSummary::default();

        for name in due {
            if stop_requested(shutdown) {
                summary.interrupted = true;
                break;
            }
            let Some(slot) = self.slots.iter().find(|s| s.schedule.name == name) else {
                continue;
            };

            sink.progress(Progress::Polling { source: &name });
            let fetch = fetch_with_timeout(slot.fetcher.as_ref(), &self.request, self.settings.fetch_timeout)
                .instrument(info_span!("poll", source = %name));
            let fetched = tokio::select! {
                fetched = fetch => fetched,
                _ = shutdown_signal(shutdown) => {
                    debug!(source = %name, "fetch abandoned on shutdown");
                    summary.interrupted = true;
                    break;
                }
            };
            self.state.record_poll(&name, epoch_seconds_now());
            summary.polled.push(name.clone());

            match fetched {
                Ok(raw) => {
                    let listings = normalize_batch(&name, raw);
                    let batch = self
                        .pipeline
                        .process_batch(&mut self.state, listings, first_run, &mut self.counters, sink, shutdown)
                        .await;
                    if batch.fresh == 0 {
                        sink.progress(Progress::NoNewListings { source: &name });
                    }
                    debug!(source = %name, fresh = batch.fresh, emitted = batch.emitted, saved = batch.saved, "batch processed");
                    summary.fresh += batch.fresh;
                    summary.emitted += batch.emitted;
                    summary.saved += batch.saved;
                    summary.interrupted |= batch.interrupted;
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!(source = %name, error = %message, "fetch failed; retrying on next due cycle");
                    sink.progress(Progress::FetchFailed {
                        source: &name,
                        error: &message,
                    });
                    summary.failed.push(name.clone());
                }
            }

            if let Err(err) = self.store.save(&mut self.state).await {
                warn!(path = %self.store.path().display(), error = %format!("{err:#}"), "state save failed");
            }
            if summary.interrupted {
                break;
            }
        }

        if first_run && !summary.interrupted {
            info!(sources = self.slots.len(), "bootstrap pass complete");
            self.phase = LoopPhase::Steady;
        }
        summary
    }

    /// Tick until `shutdown` flips to true (or its sender goes away), then save
    /// state one final time.
    pub async fn run(
        mut self,
        sink: &mut dyn ListingSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<RadarOutcome> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.tick(sink, Some(&shutdown)).await;
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.settings.tick_interval) => {}
            }
        }

        info!("shutdown requested; saving state");
        self.store
            .save(&mut self.state)
            .await
            .context("saving state on shutdown")?;
        Ok(RadarOutcome {
            state: self.state,
            counters: self.counters,
        })
    }
}

async fn fetch_with_timeout(
    fetcher: &dyn SourceFetcher,
    request: &FetchRequest,
    timeout: Option<Duration>,
) -> Result<Vec<RawListing>, FetchError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fetcher.fetch(request))
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::Timeout {
                    source_name: fetcher.source_name().to_string(),
                    seconds: limit.as_secs(),
                })
            }),
        None => fetcher.fetch(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AcceptedListing, PipelineSettings};
    use async_trait::async_trait;
    use radar_storage::Ledger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct CountingFetcher {
        name: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl SourceFetcher for CountingFetcher {
        fn source_name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawListing>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FetchError::Timeout {
                    source_name: self.name.to_string(),
                    seconds: 0,
                });
            }
            Ok(vec![RawListing {
                title: Some(format!("{} role", self.name)),
                company: Some("Acme".into()),
                job_url: Some(format!("https://{}.example/1", self.name)),
                ..Default::default()
            }])
        }
    }

    /// Never returns.
    struct HangingFetcher;

    #[async_trait]
    impl SourceFetcher for HangingFetcher {
        fn source_name(&self) -> &str {
            "zip_recruiter"
        }

        async fn fetch(&self, _request: &FetchRequest) -> Result<Vec<RawListing>, FetchError> {
            std::future::pending().await
        }
    }

    struct Discard;

    impl ListingSink for Discard {
        fn accepted(&mut self, _accepted: &AcceptedListing) {}
    }

    fn request() -> FetchRequest {
        FetchRequest {
            search_term: String::new(),
            location: "USA".into(),
            results_wanted: 25,
            hours_old: 24,
        }
    }

    fn build(dir: &std::path::Path, fetchers: Vec<(Duration, CountingFetcher)>) -> RadarLoop {
        let slots = fetchers
            .into_iter()
            .map(|(interval, f)| SourceSlot::new(interval, Box::new(f)))
            .collect();
        RadarLoop::new(
            slots,
            request(),
            StateStore::new(dir.join("state.json"), 100),
            RadarState::default(),
            AcceptancePipeline::new(PipelineSettings::default(), Ledger::new(dir.join("ledger.md"))),
            LoopSettings::default(),
        )
    }

    #[tokio::test]
    async fn bootstrap_polls_everything_then_respects_intervals() {
        let dir = tempdir().expect("tempdir");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut radar = build(
            dir.path(),
            vec![
                (Duration::from_secs(3600), CountingFetcher { name: "indeed", calls: calls.clone(), fail: false }),
                (Duration::from_secs(3600), CountingFetcher { name: "google", calls: calls.clone(), fail: false }),
            ],
        );
        assert_eq!(radar.phase(), LoopPhase::Bootstrap);

        let first = radar.tick(&mut Discard, None).await;
        assert_eq!(first.polled, vec!["indeed".to_string(), "google".to_string()]);
        assert_eq!(first.emitted, 2);
        assert_eq!(radar.phase(), LoopPhase::Steady);

        let second = radar.tick(&mut Discard, None).await;
        assert!(second.polled.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn failing_source_does_not_block_the_rest() {
        let dir = tempdir().expect("tempdir");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut radar = build(
            dir.path(),
            vec![
                (Duration::from_secs(1), CountingFetcher { name: "indeed", calls: calls.clone(), fail: true }),
                (Duration::from_secs(1), CountingFetcher { name: "google", calls: calls.clone(), fail: false }),
            ],
        );

        let summary = radar.tick(&mut Discard, None).await;
        assert_eq!(summary.failed, vec!["indeed".to_string()]);
        assert_eq!(summary.emitted, 1);
        assert!(radar.state().last_poll("indeed").is_some());
        assert!(radar.state().last_poll("google").is_some());
    }

    #[tokio::test]
    async fn pending_shutdown_interrupts_the_pass() {
        let dir = tempdir().expect("tempdir");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut radar = build(
            dir.path(),
            vec![(Duration::from_secs(1), CountingFetcher { name: "indeed", calls: calls.clone(), fail: false })],
        );
        let (tx, rx) = watch::channel(true);

        let summary = radar.tick(&mut Discard, Some(&rx)).await;
        assert!(summary.interrupted);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(radar.phase(), LoopPhase::Bootstrap);
        drop(tx);
    }

    #[tokio::test]
    async fn run_saves_state_on_shutdown() {
        let dir = tempdir().expect("tempdir");
        let calls = Arc::new(AtomicUsize::new(0));
        let radar = build(
            dir.path(),
            vec![(Duration::from_secs(3600), CountingFetcher { name: "indeed", calls: calls.clone(), fail: false })],
        );
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let state = radar.run(&mut Discard, rx).await.expect("run").state;
        stopper.await.expect("stopper");

        assert_eq!(state.seen.len(), 1);
        let reloaded = StateStore::new(dir.path().join("state.json"), 100).load().await;
        assert_eq!(reloaded.seen, state.seen);
        assert!(reloaded.last_poll("indeed").is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    fn hanging_loop(dir: &std::path::Path, fetch_timeout: Duration, calls: Arc<AtomicUsize>) -> RadarLoop {
        RadarLoop::new(
            vec![
                SourceSlot::new(Duration::from_secs(5), Box::new(HangingFetcher)),
                SourceSlot::new(
                    Duration::from_secs(3),
                    Box::new(CountingFetcher { name: "indeed", calls, fail: false }),
                ),
            ],
            request(),
            StateStore::new(dir.join("state.json"), 100),
            RadarState::default(),
            AcceptancePipeline::new(PipelineSettings::default(), Ledger::new(dir.join("ledger.md"))),
            LoopSettings {
                tick_interval: Duration::from_millis(10),
                fetch_timeout: Some(fetch_timeout),
            },
        )
    }

    #[tokio::test]
    async fn fetch_timeout_fails_the_source_and_records_the_poll() {
        let dir = tempdir().expect("tempdir");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut radar = hanging_loop(dir.path(), Duration::from_millis(20), calls.clone());

        let summary = radar.tick(&mut Discard, None).await;

        assert_eq!(summary.failed, vec!["zip_recruiter".to_string()]);
        assert_eq!(summary.polled, vec!["zip_recruiter".to_string(), "indeed".to_string()]);
        assert!(radar.state().last_poll("zip_recruiter").is_some());
        assert_eq!(summary.emitted, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(radar.phase(), LoopPhase::Steady);
    }

    #[tokio::test]
    async fn shutdown_abandons_a_fetch_in_flight() {
        let dir = tempdir().expect("tempdir");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut radar = hanging_loop(dir.path(), Duration::from_secs(60), calls.clone());
        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
            tx
        });

        let summary = tokio::time::timeout(Duration::from_secs(5), radar.tick(&mut Discard, Some(&rx)))
            .await
            .expect("tick stops promptly");
        let _tx = stopper.await.expect("stopper");

        assert!(summary.interrupted);
        assert!(summary.polled.is_empty());
        assert!(radar.state().last_poll("zip_recruiter").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(radar.phase(), LoopPhase::Bootstrap);
    }
}
