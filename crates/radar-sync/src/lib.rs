//! Polling, deduplication and acceptance pipeline orchestration.

pub mod config;
pub mod control;
pub mod pipeline;
pub mod scheduler;

pub use config::{
    build_fetcher, load_resume, ConfigPaths, ProfileConfig, SourceConfig, SourceMode,
    SourceRegistry,
};
pub use control::{LoopPhase, LoopSettings, RadarLoop, RadarOutcome, SourceSlot, TickSummary};
pub use pipeline::{
    AcceptancePipeline, AcceptedListing, BatchSummary, ListingSink, PipelineSettings, Progress,
    RadarCounters, DEFAULT_SAVE_THRESHOLD,
};
pub use scheduler::{due_sources, is_due, SourceSchedule};

pub const CRATE_NAME: &str = "radar-sync";
