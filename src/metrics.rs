//! Prometheus-style counters and histograms
//!
//! Emitted through the `metrics` facade; a recorder is only installed when
//! the exporter is enabled, otherwise every call is a no-op.

use metrics::{counter, histogram};
use std::time::Duration;

/// Track a source fetch outcome
pub fn track_fetch(source: &str, success: bool, latency: Duration) {
    counter!(
        "pricefeeder_fetched_prices_total",
        "source" => source.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
    histogram!("pricefeeder_price_fetch_latency_seconds", "source" => source.to_string())
        .record(latency.as_secs_f64());
}

/// Track the price the aggregate provider settled on
pub fn track_aggregate(pair: &str, source: &str, success: bool) {
    counter!(
        "pricefeeder_aggregate_prices_total",
        "pair" => pair.to_string(),
        "source" => source.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

/// Track a vote transaction submission
pub fn track_post(success: bool) {
    counter!("pricefeeder_prices_posted_total", "success" => success.to_string()).increment(1);
}

pub fn track_broadcast_latency(tx_type: &'static str, latency: Duration) {
    histogram!("pricefeeder_tx_broadcast_latency_seconds", "tx_type" => tx_type)
        .record(latency.as_secs_f64());
}
