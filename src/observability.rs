use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "reserva_bookings_total";

/// Histogram: booking latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "reserva_booking_duration_seconds";

/// Counter: slot listings served.
pub const SLOT_QUERIES_TOTAL: &str = "reserva_slot_queries_total";

/// Counter: requests refused by the rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "reserva_rate_limited_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered providers.
pub const PROVIDERS_ACTIVE: &str = "reserva_providers_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "reserva_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "reserva_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
