//! Metrics hooks for discovery sessions
//!
//! With the `metrics` feature enabled these forward to the `metrics` crate
//! facade; install any recorder to collect them. Without it they compile to
//! nothing.

#[cfg(feature = "metrics")]
use ::metrics::{counter, gauge};

/// Counter: provider browse calls issued
pub const BROWSES_STARTED: &str = "dnssd_mux_browses_started_total";
/// Counter: failed browse attempts that were retried
pub const BROWSE_RETRIES: &str = "dnssd_mux_browse_retries_total";
/// Counter: records fanned out to subscribers
pub const RECORDS_PUBLISHED: &str = "dnssd_mux_records_published_total";
/// Counter: active periods that ended with a terminal error
pub const TERMINAL_FAILURES: &str = "dnssd_mux_terminal_failures_total";
/// Gauge: subscribers attached to the active period
pub const SUBSCRIBERS: &str = "dnssd_mux_subscribers";

pub(crate) fn record_browse_started() {
    #[cfg(feature = "metrics")]
    counter!(BROWSES_STARTED).increment(1);
}

pub(crate) fn record_retry() {
    #[cfg(feature = "metrics")]
    counter!(BROWSE_RETRIES).increment(1);
}

pub(crate) fn record_published() {
    #[cfg(feature = "metrics")]
    counter!(RECORDS_PUBLISHED).increment(1);
}

pub(crate) fn record_terminal_failure() {
    #[cfg(feature = "metrics")]
    counter!(TERMINAL_FAILURES).increment(1);
}

pub(crate) fn set_subscribers(_count: usize) {
    #[cfg(feature = "metrics")]
    gauge!(SUBSCRIBERS).set(_count as f64);
}
