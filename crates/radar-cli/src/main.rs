mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use radar_adapters::{FetchRequest, OpenRouterScorer, Scorer, OPENROUTER_API_KEY_ENV};
use radar_core::Score;
use radar_storage::{HttpClient, HttpClientConfig, Ledger, StateStore};
use radar_sync::{
    build_fetcher, load_resume, AcceptancePipeline, ConfigPaths, LoopPhase, LoopSettings,
    PipelineSettings, ProfileConfig, RadarLoop, SourceConfig, SourceRegistry, SourceSlot,
    DEFAULT_SAVE_THRESHOLD,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::render::{summary_line, Banner, TerminalSink};

const DEV_SEARCH_TERM: &str = "software engineer";
const DEFAULT_LOG_FILTER: &str = "warn,job_radar=info,radar_sync=info,radar_storage=info,radar_adapters=info";

#[derive(Debug, Parser)]
#[command(name = "job-radar")]
#[command(about = "Poll job boards, drop repeats, score and surface new listings")]
struct Cli {
    /// Search term passed to every source (empty matches everything)
    #[arg(long, default_value = "")]
    search: String,
    #[arg(long, default_value = "USA")]
    location: String,
    /// Persisted state file
    #[arg(long, default_value = ".radar_state.json")]
    state: PathBuf,
    /// Append-only file of saved matches
    #[arg(long, default_value = "radar_matches.md")]
    ledger: PathBuf,
    #[arg(long, default_value_t = 5000)]
    max_seen: usize,
    /// Cap on new listings per source during the first pass
    #[arg(long, default_value_t = 20)]
    initial_limit: usize,
    #[arg(long, default_value_t = 24)]
    hours_old: u32,
    /// Results requested per fetch
    #[arg(long, default_value_t = 25)]
    results: usize,
    /// Delete the state file before starting
    #[arg(long)]
    reset_state: bool,
    /// Disable scoring even when an API key is present
    #[arg(long)]
    no_ai: bool,
    /// Poll a single source
    #[arg(long, value_name = "SOURCE")]
    only: Option<String>,
    #[arg(long)]
    with_linkedin: bool,
    /// Per-source poll interval override, repeatable
    #[arg(long = "interval", value_name = "SOURCE=SECS", value_parser = parse_interval)]
    intervals: Vec<(String, u64)>,
    /// Seconds between indeed polls [default: 3]
    #[arg(long)]
    indeed_interval: Option<u64>,
    /// Seconds between zip_recruiter polls [default: 5]
    #[arg(long)]
    zip_interval: Option<u64>,
    /// Seconds between google polls [default: 8]
    #[arg(long)]
    google_interval: Option<u64>,
    #[arg(long)]
    proxy: Option<String>,
    /// Search for "software engineer" when no search term is given
    #[arg(long)]
    dev: bool,
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
    #[arg(long, default_value = "fixtures")]
    fixtures_dir: PathBuf,
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,
    #[arg(long, default_value_t = 120)]
    fetch_timeout_secs: u64,
    #[arg(long, default_value_t = 60)]
    score_timeout_secs: u64,
}

impl Cli {
    fn search_term(&self) -> &str {
        if self.dev && self.search.trim().is_empty() {
            DEV_SEARCH_TERM
        } else {
            &self.search
        }
    }
}

fn parse_interval(raw: &str) -> Result<(String, u64), String> {
    let (name, secs) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SOURCE=SECS, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing source name in {raw:?}"));
    }
    let secs: u64 = secs
        .trim()
        .parse()
        .map_err(|_| format!("invalid seconds in {raw:?}"))?;
    if secs == 0 {
        return Err(format!("interval in {raw:?} must be at least one second"));
    }
    Ok((name.to_string(), secs))
}

/// Apply flag overrides on top of the loaded (or built-in) registry.
fn resolve_registry(cli: &Cli, loaded: Option<SourceRegistry>) -> Result<SourceRegistry> {
    let mut registry = loaded.unwrap_or_else(|| SourceRegistry::builtin(cli.with_linkedin));
    if cli.with_linkedin {
        match registry.sources.iter_mut().find(|s| s.name == "linkedin") {
            Some(linkedin) => linkedin.enabled = true,
            None => registry.sources.push(SourceConfig::fixture("linkedin", 30)),
        }
    }

    let named = [
        ("indeed", cli.indeed_interval),
        ("zip_recruiter", cli.zip_interval),
        ("google", cli.google_interval),
    ];
    for (name, secs) in named {
        if let Some(secs) = secs {
            registry.set_interval(name, secs)?;
        }
    }
    for (name, secs) in &cli.intervals {
        registry.set_interval(name, *secs)?;
    }
    if let Some(only) = &cli.only {
        registry.restrict_to(only)?;
    }
    if registry.enabled().next().is_none() {
        bail!("no enabled sources");
    }
    Ok(registry)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

/// Flip the watch channel on the first Ctrl+C; a second one exits at once.
fn spawn_interrupt_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(true);
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("second Ctrl+C; exiting without the final save");
                    std::process::exit(130);
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for Ctrl+C; stop the process externally");
                // Keep the sender alive so the loop does not read a closed channel as shutdown.
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();

    let paths = ConfigPaths::new(&cli.config_dir);
    let config = ProfileConfig::load(&paths.profile()).await?;
    let resume = load_resume(&paths.resume()).await;
    let registry = resolve_registry(&cli, SourceRegistry::load(&paths.sources()).await?)?;

    let http = HttpClient::new(HttpClientConfig {
        proxy: cli.proxy.clone(),
        ..Default::default()
    })
    .context("building HTTP client")?;

    let mut slots = Vec::new();
    for source in registry.enabled() {
        let fetcher = build_fetcher(source, &cli.fixtures_dir, &http)?;
        slots.push(SourceSlot::new(source.interval(), fetcher));
    }

    let settings = PipelineSettings {
        min_score: Score::from_percent(config.min_score),
        save_threshold: Score::from_percent(
            config
                .save_threshold
                .unwrap_or_else(|| DEFAULT_SAVE_THRESHOLD.into()),
        ),
        initial_limit: cli.initial_limit,
        score_timeout: Some(Duration::from_secs(cli.score_timeout_secs)),
    };
    let mut pipeline = AcceptancePipeline::new(settings, Ledger::new(&cli.ledger));

    let scoring_status = if cli.no_ai {
        "disabled (--no-ai)".to_string()
    } else if resume.is_empty() {
        "disabled (no resume)".to_string()
    } else {
        match OpenRouterScorer::from_env(http.clone()) {
            Some(scorer) => {
                let status = format!("enabled ({})", scorer.name());
                let scorer: Arc<dyn Scorer> = Arc::new(scorer);
                pipeline = pipeline.with_scoring(scorer, config.into_profile(resume));
                status
            }
            None => format!("disabled (no {OPENROUTER_API_KEY_ENV})"),
        }
    };

    let scoring_enabled = pipeline.scoring_enabled();
    let store = StateStore::new(&cli.state, cli.max_seen);
    if cli.reset_state {
        store.reset().await;
    }
    let state = store.load().await;

    let request = FetchRequest {
        search_term: cli.search_term().to_string(),
        location: cli.location.clone(),
        results_wanted: cli.results,
        hours_old: cli.hours_old,
    };
    let radar = RadarLoop::new(
        slots,
        request,
        store,
        state,
        pipeline,
        LoopSettings {
            tick_interval: Duration::from_millis(cli.tick_ms),
            fetch_timeout: Some(Duration::from_secs(cli.fetch_timeout_secs)),
        },
    );

    let mut sink = TerminalSink::stdout();
    let banner = Banner {
        search_term: cli.search_term(),
        location: &cli.location,
        min_score: settings.min_score,
        sources: radar.source_names(),
        scoring: &scoring_status,
        scoring_enabled,
        bootstrap: radar.phase() == LoopPhase::Bootstrap,
    };
    for line in banner.lines() {
        sink.line(&line);
    }
    info!(state = %cli.state.display(), ledger = %cli.ledger.display(), "radar starting");

    let shutdown = spawn_interrupt_listener();
    let outcome = radar.run(&mut sink, shutdown).await?;

    sink.finish();
    sink.line("");
    sink.line(&console::style("Stopped").dim().to_string());
    sink.line(&summary_line(&outcome.counters));
    info!(seen = outcome.state.seen.len(), saved = outcome.state.saved.len(), "state saved");
    Ok(())
}
