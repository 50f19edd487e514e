//! Pre-configured test data.
//!
//! - Rosters with predictable ids
//! - Engine settings tuned for paused-time tests
//! - Scan attempts and their wire form

use attendance_service::config::EngineSettings;
use attendance_service::model::{ScanAttempt, Student};
use attendance_service::roster::StaticRosterProvider;
use common::types::{CodeId, SessionId, UnixMillis};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Engine settings with short timeouts for tests.
#[must_use]
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        rotation_period: Duration::from_millis(200),
        scan_tolerance_ms: 100,
        event_buffer: 16,
        max_sessions: 64,
        handshake_timeout: Duration::from_secs(2),
        resync_interval: Duration::from_millis(50),
    }
}

/// Test roster fixture.
#[derive(Debug, Clone, Default)]
pub struct TestRoster {
    students: Vec<Student>,
}

impl TestRoster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Roster of `count` students named `{prefix}1 ..= {prefix}{count}`.
    #[must_use]
    pub fn numbered(prefix: &str, count: usize) -> Self {
        (1..=count).fold(Self::new(), |roster, n| {
            roster.with_student(format!("{prefix}{n}"))
        })
    }

    /// Add an absent student whose secondary id and name derive from `id`.
    #[must_use]
    pub fn with_student(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.students.push(Student::new(
            id.clone(),
            format!("R-{id}"),
            format!("Student {id}"),
        ));
        self
    }

    /// Students in insertion order.
    #[must_use]
    pub fn students(&self) -> Vec<Student> {
        self.students.clone()
    }

    /// A static provider serving this roster under `classroom_id`.
    #[must_use]
    pub fn into_provider(self, classroom_id: &str) -> StaticRosterProvider {
        StaticRosterProvider::new(HashMap::from([(classroom_id.to_string(), self.students)]))
    }
}

/// Builder for scan attempts.
#[derive(Debug, Clone)]
pub struct ScanBuilder {
    session_id: SessionId,
    code_id: CodeId,
    scanned_at: UnixMillis,
    student_id: String,
}

impl ScanBuilder {
    #[must_use]
    pub fn new(session_id: SessionId, code_id: CodeId) -> Self {
        Self {
            session_id,
            code_id,
            scanned_at: 0,
            student_id: "S1".to_string(),
        }
    }

    #[must_use]
    pub fn student(mut self, student_id: impl Into<String>) -> Self {
        self.student_id = student_id.into();
        self
    }

    /// Client-clock send time.
    #[must_use]
    pub fn at(mut self, scanned_at: UnixMillis) -> Self {
        self.scanned_at = scanned_at;
        self
    }

    #[must_use]
    pub fn build(self) -> ScanAttempt {
        ScanAttempt {
            session_id: self.session_id,
            code_id: self.code_id,
            scanned_at: self.scanned_at,
            student_id: self.student_id,
        }
    }

    /// The submission frame an attendee client sends. Timestamps go out as
    /// strings, the way browsers send them.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "sessionId": self.session_id.0,
            "scannedCodeId": self.code_id.0,
            "scannedAt": self.scanned_at.to_string(),
            "studentId": self.student_id,
        })
    }
}

/// Ids of `students`, in order.
#[must_use]
pub fn student_ids(students: &[Student]) -> Vec<String> {
    students.iter().map(|s| s.id.clone()).collect()
}

/// Ids out of a JSON array of students.
///
/// # Panics
///
/// Panics if `value` is not an array of objects with string `id` fields.
#[must_use]
pub fn json_student_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .expect("expected a JSON array of students")
        .iter()
        .map(|s| s["id"].as_str().expect("student without id").to_string())
        .collect()
}
