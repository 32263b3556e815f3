use std::net::SocketAddr;

use crate::model::SyncStatus;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: availability checks (single batch or catalog bulk).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "hireline_availability_checks_total";

/// Counter: quote estimates. Labels: status.
pub const QUOTES_TOTAL: &str = "hireline_quotes_total";

/// Histogram: quote estimate latency in seconds.
pub const QUOTE_DURATION_SECONDS: &str = "hireline_quote_duration_seconds";

/// Counter: external ledger sync attempts. Labels: outcome.
pub const SYNC_ATTEMPTS_TOTAL: &str = "hireline_sync_attempts_total";

/// Histogram: external ledger call latency in seconds.
pub const SYNC_DURATION_SECONDS: &str = "hireline_sync_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: blocking reservations currently held in the index.
pub const RESERVATIONS_ACTIVE: &str = "hireline_reservations_active";

/// Gauge: sync records per status. Labels: status.
pub const SYNC_RECORDS: &str = "hireline_sync_records";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Install the fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// Outcome label for the sync attempt counter.
pub fn sync_outcome_label(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Synced => "synced",
        SyncStatus::Failed => "failed",
        SyncStatus::NotSynced | SyncStatus::InProgress => "skipped",
    }
}
