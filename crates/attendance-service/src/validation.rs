//! Scan validation.
//!
//! [`validate`] is a pure decision over a session's code history. A scan's
//! client timestamp is moved onto the server clock and back to the instant
//! the code was rendered on the presenter's screen:
//!
//! ```text
//! adjusted = scanned_at + clock_drift - attendee_latency - render_latency
//! ```
//!
//! The matched code is accepted when `|adjusted - code.expired_at|` is within
//! the tolerance window.

use crate::clock_sync::AttendeeTiming;
use crate::model::{ScanAttempt, SessionState};
use common::types::{CodeId, UnixMillis};
use std::fmt;

/// Why a scan was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRejection {
    /// The student was already marked present.
    AlreadyPresent,
    /// The code matched but the adjusted scan time fell outside the window.
    CodeExpired { delta_ms: i64 },
    /// No current or archived code carries this id.
    UnknownCode,
}

impl ScanRejection {
    /// Bounded label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ScanRejection::AlreadyPresent => "already_present",
            ScanRejection::CodeExpired { .. } => "expired",
            ScanRejection::UnknownCode => "unknown_code",
        }
    }

    pub fn client_message(&self) -> &'static str {
        match self {
            ScanRejection::AlreadyPresent => "Student already marked present",
            ScanRejection::CodeExpired { .. } => "Scanned code is invalid or expired",
            ScanRejection::UnknownCode => "Scanned code is not valid for this session",
        }
    }
}

impl fmt::Display for ScanRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanRejection::AlreadyPresent => write!(f, "Already present"),
            ScanRejection::CodeExpired { delta_ms } => {
                write!(f, "Code expired (delta {delta_ms}ms)")
            }
            ScanRejection::UnknownCode => write!(f, "Unknown code"),
        }
    }
}

/// Which entry of the history matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedCode {
    Current,
    /// Archived code; `age` is 0 for the most recently archived entry.
    Past { age: usize },
}

/// Details of an accepted scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedScan {
    pub code_id: CodeId,
    pub matched: MatchedCode,
    pub adjusted_scan_time: UnixMillis,
    /// `adjusted_scan_time - code.expired_at`.
    pub delta_ms: i64,
}

/// Move a client scan timestamp onto the server's render timeline.
pub fn adjusted_scan_time(
    scanned_at: UnixMillis,
    timing: &AttendeeTiming,
    render_latency_ms: i64,
) -> UnixMillis {
    scanned_at
        .saturating_add(timing.clock_drift_ms)
        .saturating_sub(timing.latency_ms)
        .saturating_sub(render_latency_ms)
}

/// Decide whether `attempt` proves presence.
///
/// Students missing from the roster are not rejected here; marking them
/// present fails afterwards with `StudentNotFound`.
///
/// # Errors
///
/// Returns the [`ScanRejection`] describing why the scan was refused.
pub fn validate(
    attempt: &ScanAttempt,
    state: &SessionState,
    timing: &AttendeeTiming,
    tolerance_ms: i64,
) -> Result<AcceptedScan, ScanRejection> {
    if state
        .student(&attempt.student_id)
        .is_some_and(|student| student.is_present)
    {
        return Err(ScanRejection::AlreadyPresent);
    }

    let adjusted = adjusted_scan_time(attempt.scanned_at, timing, state.render_latency_ms());

    let judge = |expired_at: UnixMillis, matched: MatchedCode| {
        let delta_ms = adjusted.saturating_sub(expired_at);
        if delta_ms.saturating_abs() <= tolerance_ms {
            Ok(AcceptedScan {
                code_id: attempt.code_id,
                matched,
                adjusted_scan_time: adjusted,
                delta_ms,
            })
        } else {
            Err(ScanRejection::CodeExpired { delta_ms })
        }
    };

    if let Some(current) = state.current_code() {
        if current.id == attempt.code_id {
            return judge(current.expired_at, MatchedCode::Current);
        }
    }

    // Newest first; the first id match decides.
    state
        .past_codes()
        .iter()
        .rev()
        .enumerate()
        .find(|(_, code)| code.id == attempt.code_id)
        .map_or(Err(ScanRejection::UnknownCode), |(age, code)| {
            judge(code.expired_at, MatchedCode::Past { age })
        })
}
