//! Per-source interval gating.

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSchedule {
    pub name: String,
    pub interval: Duration,
}

impl SourceSchedule {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }
}

/// A source is due on the first run, or once `interval` has elapsed since its
/// last completed poll. A source never polled counts as last polled at epoch 0.
pub fn is_due(now: f64, interval: Duration, last_poll: Option<f64>, first_run: bool) -> bool {
    first_run || now - last_poll.unwrap_or(0.0) >= interval.as_secs_f64()
}

/// Names of the due sources, in schedule order.
pub fn due_sources(
    now: f64,
    schedules: &[SourceSchedule],
    last_poll: &BTreeMap<String, f64>,
    first_run: bool,
) -> Vec<String> {
    schedules
        .iter()
        .filter(|s| is_due(now, s.interval, last_poll.get(&s.name).copied(), first_run))
        .map(|s| s.name.clone())
        .collect()
}
