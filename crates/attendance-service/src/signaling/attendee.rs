//! Attendee connection flow.
//!
//! The attendee first reports its clock; the resulting drift and latency
//! apply to every scan on this connection. Scans are then read one at a
//! time and answered with `{status, message}`. A rejected scan keeps the
//! connection open for another try; the first accepted scan ends it.
//!
//! There is no timeout on the scan loop. An attendee may keep retrying
//! until a scan lands or the connection drops.

use super::wire::{ScanSubmission, StatusReply};
use super::{send_status, ConnectionGuard};
use crate::actors::{ActorMetrics, SessionRegistryHandle};
use crate::clock_sync::sync_attendee;
use crate::config::EngineSettings;
use crate::errors::EngineError;
use crate::model::ScanAttempt;
use common::clock::Clock;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const SCAN_OK: &str = "Attendance marked successfully";
const INVALID_SCAN: &str = "Invalid scan data";

/// Serve one attendee connection until a scan is accepted or the client leaves.
///
/// `started` is when the connection was accepted.
///
/// # Errors
///
/// Returns `EngineError::Handshake` if the clock report never arrives or
/// does not parse. Scan rejections are reported to the client, not returned.
#[instrument(skip_all, name = "attendance.signaling.attendee")]
pub async fn run_attendee<S, R>(
    mut sink: S,
    mut stream: R,
    registry: SessionRegistryHandle,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    metrics: Arc<ActorMetrics>,
    started: Instant,
) -> Result<(), EngineError>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
    R: Stream<Item = String> + Unpin,
{
    let _guard = ConnectionGuard::open(metrics);

    let timing =
        match sync_attendee(&mut stream, clock.as_ref(), started, settings.handshake_timeout).await
        {
            Ok(timing) => timing,
            Err(e) => {
                warn!(
                    target: "attendance.signaling.attendee",
                    error = %e,
                    "Attendee handshake failed"
                );
                let _ = send_status(&mut sink, StatusReply::error(e.client_message())).await;
                let _ = sink.close().await;
                return Err(e);
            }
        };

    let mut attempts: u32 = 0;
    while let Some(text) = stream.next().await {
        attempts = attempts.saturating_add(1);

        let submission: ScanSubmission = match serde_json::from_str(&text) {
            Ok(submission) => submission,
            Err(e) => {
                debug!(
                    target: "attendance.signaling.attendee",
                    error = %e,
                    "Unreadable scan submission"
                );
                if send_status(&mut sink, StatusReply::error(INVALID_SCAN))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        let attempt = ScanAttempt {
            session_id: submission.session_id,
            code_id: submission.scanned_code_id,
            scanned_at: submission.scanned_at,
            student_id: submission.student_id,
        };
        let session_id = attempt.session_id;
        let student_id = attempt.student_id.clone();

        match registry.submit_scan(attempt, timing).await {
            Ok(accepted) => {
                info!(
                    target: "attendance.signaling.attendee",
                    session_id = %session_id,
                    student_id = %student_id,
                    delta_ms = accepted.delta_ms,
                    attempts,
                    "Attendance marked"
                );
                let _ = send_status(&mut sink, StatusReply::ok(SCAN_OK)).await;
                break;
            }
            Err(e) => {
                debug!(
                    target: "attendance.signaling.attendee",
                    session_id = %session_id,
                    student_id = %student_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Scan refused"
                );
                if send_status(&mut sink, StatusReply::error(e.client_message()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    Ok(())
}
