//! Observability for the attendance service.
//!
//! All actor loops use `#[instrument(skip_all)]` with explicit fields.
//! Metric labels are bounded enums; session, code and student ids only
//! ever appear in log fields.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `attendance_sessions_active` | Gauge | none | Live sessions |
//! | `attendance_connections_active` | Gauge | none | Open presenter and attendee connections |
//! | `attendance_code_rotations_total` | Counter | none | Codes issued |
//! | `attendance_scans_total` | Counter | `outcome` | Scan decisions |
//! | `attendance_scan_delta_ms` | Histogram | none | Distance of scans from code expiry |
//! | `attendance_snapshots_dropped_total` | Counter | none | Notifications dropped on a full pipe |
//! | `attendance_clock_sync_latency_seconds` | Histogram | `role` | Handshake latency estimates |
//! | `attendance_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `attendance_actor_panics_total` | Counter | `actor_type` | Crashed actors |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, ReadinessReport};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_clock_sync_latency, record_code_rotation,
    record_scan, record_scan_delta, record_snapshot_dropped, set_actor_mailbox_depth,
    set_connections_active, set_sessions_active,
};
