//! Metrics definitions for the attendance service
//!
//! All metrics follow Prometheus naming conventions:
//! - `attendance_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 3 values (registry, session, connection)
//! - `outcome`: 5 values (accepted, already_present, expired, unknown_code, unknown_student)
//! - `role`: 2 values (presenter, attendee)
//!
//! Session and student identifiers are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Histogram buckets:
/// - Clock-sync latency: sub-second network round trips
/// - Scan delta: centred on the acceptance window
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("attendance_clock_sync".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set clock sync buckets: {e}"))?
        // Absolute delta in milliseconds; the default window is 100ms
        .set_buckets_for_metric(
            Matcher::Full("attendance_scan_delta_ms".to_string()),
            &[5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 150.0, 250.0, 500.0, 1000.0],
        )
        .map_err(|e| format!("Failed to set scan delta buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session & Connection Metrics (Gauges)
// ============================================================================

/// Set the number of active sessions.
///
/// Metric: `attendance_sessions_active`
/// Labels: none
pub fn set_sessions_active(count: u64) {
    // u64 to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("attendance_sessions_active").set(count as f64);
}

/// Set the number of open presenter and attendee connections.
///
/// Metric: `attendance_connections_active`
/// Labels: none
pub fn set_connections_active(count: u64) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("attendance_connections_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `attendance_actor_mailbox_depth`
/// Labels: `actor_type` (registry, session, connection)
///
/// High values indicate the actor is falling behind in message processing.
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("attendance_actor_mailbox_depth", "actor_type" => actor_type.to_string())
        .set(depth as f64);
}

// ============================================================================
// Rotation & Scan Metrics
// ============================================================================

/// Record one code rotation.
///
/// Metric: `attendance_code_rotations_total`
/// Labels: none
pub fn record_code_rotation() {
    counter!("attendance_code_rotations_total").increment(1);
}

/// Record a scan outcome.
///
/// Metric: `attendance_scans_total`
/// Labels: `outcome`
pub fn record_scan(outcome: &str) {
    counter!("attendance_scans_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record how far an adjusted scan time fell from the matched code's expiry.
///
/// Metric: `attendance_scan_delta_ms`
/// Labels: none
///
/// Recorded as an absolute value; sustained values near the tolerance
/// suggest the window or the latency estimates need tuning.
pub fn record_scan_delta(delta_ms: i64) {
    #[allow(clippy::cast_precision_loss)]
    histogram!("attendance_scan_delta_ms").record(delta_ms.unsigned_abs() as f64);
}

/// Record a snapshot dropped because a session's notification pipe was full.
///
/// Metric: `attendance_snapshots_dropped_total`
/// Labels: none
pub fn record_snapshot_dropped() {
    counter!("attendance_snapshots_dropped_total").increment(1);
}

/// Record the one-way latency estimated during a clock-sync handshake.
///
/// Metric: `attendance_clock_sync_latency_seconds`
/// Labels: `role` (presenter, attendee)
pub fn record_clock_sync_latency(role: &str, latency: Duration) {
    histogram!("attendance_clock_sync_latency_seconds", "role" => role.to_string())
        .record(latency.as_secs_f64());
}

// ============================================================================
// Actor Health
// ============================================================================

/// Record an actor panic event.
///
/// Metric: `attendance_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("attendance_actor_panics_total", "actor_type" => actor_type.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // These execute the recording functions against the global no-op
    // recorder; values are only asserted where a local recorder is installed.

    #[test]
    fn test_set_gauges() {
        set_sessions_active(0);
        set_sessions_active(1000);
        set_connections_active(0);
        set_connections_active(5000);
    }

    #[test]
    fn test_set_actor_mailbox_depth() {
        set_actor_mailbox_depth("registry", 0);
        set_actor_mailbox_depth("session", 50);
        set_actor_mailbox_depth("connection", 100);
    }

    #[test]
    fn test_record_scan_outcomes() {
        record_scan("accepted");
        record_scan("already_present");
        record_scan("expired");
        record_scan("unknown_code");
        record_scan("error");
        record_scan_delta(-40);
        record_scan_delta(101);
    }

    #[test]
    fn test_record_clock_sync_latency() {
        record_clock_sync_latency("presenter", Duration::from_millis(12));
        record_clock_sync_latency("attendee", Duration::from_millis(80));
    }

    #[test]
    fn test_record_actor_panic() {
        record_actor_panic("registry");
        record_actor_panic("session");
        record_actor_panic("connection");
    }

    #[test]
    fn test_counters_reach_local_recorder() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_code_rotation();
            record_code_rotation();
            record_snapshot_dropped();
        });

        let counters: Vec<(String, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(count) => Some((key.key().name().to_string(), count)),
                _ => None,
            })
            .collect();

        assert!(counters.contains(&("attendance_code_rotations_total".to_string(), 2)));
        assert!(counters.contains(&("attendance_snapshots_dropped_total".to_string(), 1)));
    }
}
