use std::net::SocketAddr;

use crate::model::Event;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total events committed to the log. Labels: event.
pub const EVENTS_TOTAL: &str = "proctor_events_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of live schedules.
pub const SCHEDULES_ACTIVE: &str = "proctor_schedules_active";

/// Histogram: time spent waiting for a schedule write lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "proctor_lock_wait_seconds";

/// Counter: lock acquisitions abandoned at the wait deadline.
pub const LOCK_TIMEOUTS_TOTAL: &str = "proctor_lock_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "proctor_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "proctor_wal_flush_batch_size";

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

/// Map an Event variant to a short label for metrics.
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::ScheduleCreated { .. } => "schedule_created",
        Event::ScheduleUpdated { .. } => "schedule_updated",
        Event::ScheduleDeleted { .. } => "schedule_deleted",
        Event::ReservationCreated { .. } => "reservation_created",
        Event::SeatsChanged { .. } => "seats_changed",
        Event::ReservationConfirmed { .. } => "reservation_confirmed",
        Event::ReservationCancelled { .. } => "reservation_cancelled",
        Event::ReservationDeleted { .. } => "reservation_deleted",
    }
}
