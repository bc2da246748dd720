//! Metric names recorded through the `metrics` facade.
//!
//! No exporter is installed here; the embedding application picks one.

use axum::http::StatusCode;
use metrics::counter;

/// Sessions that reached OPEN (counter).
pub const SESSIONS_OPENED_TOTAL: &str = "skein_sessions_opened_total";
/// Sessions that reached CLOSED (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "skein_sessions_closed_total";
/// Sessions removed by the scheduler after the disconnect delay (counter).
pub const SESSIONS_EVICTED_TOTAL: &str = "skein_sessions_evicted_total";
/// Sessions currently held by a registry (gauge).
pub const SESSIONS_ACTIVE: &str = "skein_sessions_active";
/// Heartbeat frames enqueued by the scheduler (counter).
pub const HEARTBEATS_TOTAL: &str = "skein_heartbeats_total";
/// Requests answered with a rejection (counter, labels: status).
pub const REJECTIONS_TOTAL: &str = "skein_rejections_total";

/// Count a rejected request.
pub(crate) fn record_rejection(status: StatusCode) {
    counter!(REJECTIONS_TOTAL, "status" => status.as_u16().to_string()).increment(1);
}
