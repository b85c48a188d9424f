use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation attempts. Labels: status (success, not_available, conflict, error).
pub const RESERVATIONS_TOTAL: &str = "rental_reservations_total";

/// Histogram: reservation attempt latency in seconds.
pub const RESERVATION_DURATION_SECONDS: &str = "rental_reservation_duration_seconds";

/// Counter: availability computations.
pub const AVAILABILITY_QUERIES_TOTAL: &str = "rental_availability_queries_total";

/// Histogram: availability computation latency in seconds.
pub const AVAILABILITY_DURATION_SECONDS: &str = "rental_availability_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: vehicles in the fleet.
pub const VEHICLES: &str = "rental_vehicles";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rental_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rental_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
