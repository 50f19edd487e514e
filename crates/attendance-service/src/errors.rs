//! Attendance engine error types.
//!
//! Error types map to numeric codes for client responses. Internal details
//! are logged server-side but not exposed to clients.

use crate::roster::RosterError;
use crate::validation::ScanRejection;
use common::error::CommonError;
use common::types::SessionId;
use thiserror::Error;

/// Attendance engine error type.
///
/// Maps to client error codes:
/// - `CodeExpiredOrUnknown`, `AlreadyPresent`: `REJECTED` (1), retryable by the attendee
/// - `Handshake`: `BAD_REQUEST` (2)
/// - `SessionNotFound`, `StudentNotFound`: `NOT_FOUND` (4)
/// - `RosterRetrievalFailed`: `UNAVAILABLE` (5)
/// - `Internal`: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum EngineError {
    /// Session does not exist (never created or already torn down).
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Scanned code is unknown to the session or outside the tolerance window.
    #[error("Scan rejected: {0}")]
    CodeExpiredOrUnknown(ScanRejection),

    /// Student has already been marked present by an earlier scan.
    #[error("Student already marked present")]
    AlreadyPresent,

    /// Student id is not on the session roster.
    #[error("Student not found: {0}")]
    StudentNotFound(String),

    /// Roster source could not resolve the classroom.
    #[error("Roster retrieval failed: {0}")]
    RosterRetrievalFailed(String),

    /// Clock-sync handshake or message decoding failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Registry is at its session limit.
    #[error("Session capacity exceeded")]
    CapacityExceeded,

    /// Registry is shutting down and refuses new sessions.
    #[error("Engine is draining")]
    Draining,

    /// Internal error (actor mailbox closed, random source failure, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the client error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            EngineError::CodeExpiredOrUnknown(_) | EngineError::AlreadyPresent => 1, // REJECTED
            EngineError::Handshake(_) => 2,                                          // BAD_REQUEST
            EngineError::SessionNotFound(_) | EngineError::StudentNotFound(_) => 4,  // NOT_FOUND
            EngineError::RosterRetrievalFailed(_) => 5,                              // UNAVAILABLE
            EngineError::Internal(_) => 6, // INTERNAL_ERROR
            EngineError::CapacityExceeded | EngineError::Draining => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Whether an attendee may resubmit after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::CodeExpiredOrUnknown(_)
                | EngineError::AlreadyPresent
                | EngineError::SessionNotFound(_)
                | EngineError::StudentNotFound(_)
                | EngineError::Handshake(_)
        )
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            EngineError::SessionNotFound(_) => "Invalid session ID".to_string(),
            EngineError::CodeExpiredOrUnknown(rejection) => rejection.client_message().to_string(),
            EngineError::AlreadyPresent => "Student already marked present".to_string(),
            EngineError::StudentNotFound(_) => "Student is not enrolled in this session".to_string(),
            EngineError::RosterRetrievalFailed(_) => "Failed to load the class roster".to_string(),
            EngineError::Handshake(_) => "Failed to read initial data".to_string(),
            EngineError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            EngineError::Draining => "Server is shutting down, please reconnect".to_string(),
            EngineError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<ScanRejection> for EngineError {
    fn from(rejection: ScanRejection) -> Self {
        match rejection {
            ScanRejection::AlreadyPresent => EngineError::AlreadyPresent,
            other => EngineError::CodeExpiredOrUnknown(other),
        }
    }
}

impl From<RosterError> for EngineError {
    fn from(err: RosterError) -> Self {
        EngineError::RosterRetrievalFailed(err.to_string())
    }
}

impl From<CommonError> for EngineError {
    fn from(err: CommonError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(EngineError::AlreadyPresent.error_code(), 1);
        assert_eq!(
            EngineError::CodeExpiredOrUnknown(ScanRejection::UnknownCode).error_code(),
            1
        );
        assert_eq!(EngineError::Handshake("eof".to_string()).error_code(), 2);
        assert_eq!(EngineError::SessionNotFound(SessionId(1)).error_code(), 4);
        assert_eq!(
            EngineError::StudentNotFound("S1".to_string()).error_code(),
            4
        );
        assert_eq!(
            EngineError::RosterRetrievalFailed("no such class".to_string()).error_code(),
            5
        );
        assert_eq!(EngineError::Internal("boom".to_string()).error_code(), 6);
        assert_eq!(EngineError::CapacityExceeded.error_code(), 7);
        assert_eq!(EngineError::Draining.error_code(), 7);
    }

    #[test]
    fn test_scan_rejection_conversion() {
        let err: EngineError = ScanRejection::AlreadyPresent.into();
        assert!(matches!(err, EngineError::AlreadyPresent));

        let err: EngineError = ScanRejection::CodeExpired { delta_ms: 110 }.into();
        assert!(matches!(
            err,
            EngineError::CodeExpiredOrUnknown(ScanRejection::CodeExpired { delta_ms: 110 })
        ));

        let err: EngineError = ScanRejection::UnknownCode.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = EngineError::Internal("mailbox closed for session 123".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = EngineError::RosterRetrievalFailed("/etc/roster.json: denied".to_string());
        assert!(!err.client_message().contains("/etc"));
    }

    #[test]
    fn test_retryability() {
        // The attendee connection stays open after a duplicate scan
        assert!(EngineError::AlreadyPresent.is_retryable());
        assert!(!EngineError::Internal("x".to_string()).is_retryable());
        assert!(EngineError::SessionNotFound(SessionId(3)).is_retryable());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", EngineError::SessionNotFound(SessionId(77))),
            "Session not found: 77"
        );
        assert_eq!(
            format!(
                "{}",
                EngineError::CodeExpiredOrUnknown(ScanRejection::CodeExpired { delta_ms: -150 })
            ),
            "Scan rejected: Code expired (delta -150ms)"
        );
    }
}
