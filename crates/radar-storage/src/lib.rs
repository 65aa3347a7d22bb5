//! Durable radar state, the match ledger, and HTTP utilities shared by collaborators.

mod http;
mod ledger;
mod state;

pub use http::{
    is_retryable_error, is_retryable_status, HttpClient, HttpClientConfig, HttpError,
    HttpResponse, RetryPolicy,
};
pub use ledger::{Ledger, LedgerEntry, LEDGER_HEADER};
pub use state::{write_atomic, OrderedIdSet, RadarState, StateStore, DEFAULT_MAX_SEEN};

pub const CRATE_NAME: &str = "radar-storage";

/// Current wall-clock time as fractional epoch seconds, the unit of `last_poll`.
pub fn epoch_seconds_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
