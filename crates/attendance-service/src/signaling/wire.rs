//! JSON messages exchanged with presenter and attendee clients.
//!
//! Millisecond timestamps sent by clients may arrive as JSON strings (to
//! dodge 53-bit float precision in browsers) or as numbers; both parse.

use crate::attendance::AttendanceSnapshot;
use crate::model::{Code, Student};
use common::types::{CodeId, SessionId, UnixMillis};
use serde::{Deserialize, Serialize};

/// Id carried by the presenter latency probe. Never issued as a real code.
pub const PROBE_SENTINEL: u32 = 1_234_567_890;

mod millis {
    use serde::de::{self, Deserializer};
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
        }
    }
}

// ============================================================================
// Server to client
// ============================================================================

/// First message of the presenter handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "LATENCY_PROBE", rename_all = "camelCase")]
pub struct LatencyProbe {
    pub sentinel_value: u32,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        Self {
            sentinel_value: PROBE_SENTINEL,
        }
    }
}

/// Sent to the presenter once the session exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: SessionId,
    pub students: Vec<Student>,
}

/// Attendance snapshot pushed to the presenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "ATTENDANCE_UPDATE")]
pub struct AttendanceUpdate {
    pub absentees: Vec<Student>,
    pub presentees: Vec<Student>,
}

impl From<AttendanceSnapshot> for AttendanceUpdate {
    fn from(snapshot: AttendanceSnapshot) -> Self {
        Self {
            absentees: snapshot.absentees,
            presentees: snapshot.presentees,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "error")]
    Error,
}

/// Outcome of a scan or toggle request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: ReplyStatus,
    pub message: String,
}

impl StatusReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            message: message.into(),
        }
    }
}

/// Every frame the server writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Probe(LatencyProbe),
    Code(Code),
    SessionCreated(SessionCreated),
    Update(AttendanceUpdate),
    Status(StatusReply),
}

impl OutboundFrame {
    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; the frame types here never produce one
    /// in practice.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Probe(_) => "probe",
            OutboundFrame::Code(_) => "code",
            OutboundFrame::SessionCreated(_) => "session_created",
            OutboundFrame::Update(_) => "attendance_update",
            OutboundFrame::Status(_) => "status",
        }
    }
}

// ============================================================================
// Client to server
// ============================================================================

/// Second presenter handshake message: time the client takes to draw a code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReport {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(alias = "message", deserialize_with = "millis::deserialize")]
    pub render_millis: i64,
}

/// Requests a presenter may send after the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum PresenterRequest {
    #[serde(rename = "TOGGLE_ATTENDANCE")]
    ToggleAttendance {
        #[serde(rename = "studentId", alias = "srn")]
        student_id: String,
    },
}

/// Attendee handshake: the client's local clock.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeHello {
    #[serde(deserialize_with = "millis::deserialize")]
    pub client_time: UnixMillis,
}

/// One scan submitted by an attendee.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSubmission {
    pub session_id: SessionId,
    pub scanned_code_id: CodeId,
    #[serde(deserialize_with = "millis::deserialize")]
    pub scanned_at: UnixMillis,
    pub student_id: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_value(frame: &OutboundFrame) -> serde_json::Value {
        serde_json::from_str(&frame.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_probe_shape() {
        assert_eq!(
            to_value(&OutboundFrame::Probe(LatencyProbe::default())),
            json!({"type": "LATENCY_PROBE", "sentinelValue": 1_234_567_890})
        );
    }

    #[test]
    fn test_code_push_shape() {
        let frame = OutboundFrame::Code(Code {
            id: CodeId(7),
            created_at: 1_000,
            expired_at: 1_200,
        });
        assert_eq!(
            to_value(&frame),
            json!({"id": 7, "createdAt": 1000, "expiredAt": 1200})
        );
    }

    #[test]
    fn test_session_created_shape() {
        let frame = OutboundFrame::SessionCreated(SessionCreated {
            session_id: SessionId(99),
            students: vec![Student::new("S1", "R1", "Ada")],
        });
        assert_eq!(
            to_value(&frame),
            json!({
                "sessionId": 99,
                "students": [{"id": "S1", "secondaryId": "R1", "name": "Ada", "isPresent": false}]
            })
        );
    }

    #[test]
    fn test_attendance_update_shape() {
        let frame = OutboundFrame::Update(AttendanceSnapshot::default().into());
        assert_eq!(
            to_value(&frame),
            json!({"type": "ATTENDANCE_UPDATE", "absentees": [], "presentees": []})
        );
    }

    #[test]
    fn test_status_reply_shape() {
        assert_eq!(
            to_value(&OutboundFrame::Status(StatusReply::ok("done"))),
            json!({"status": "OK", "message": "done"})
        );
        assert_eq!(
            to_value(&OutboundFrame::Status(StatusReply::error("nope"))),
            json!({"status": "error", "message": "nope"})
        );
    }

    #[test]
    fn test_millis_accept_strings_and_numbers() {
        let hello: AttendeeHello =
            serde_json::from_str(r#"{"clientTime": "1700000000123"}"#).unwrap();
        assert_eq!(hello.client_time, 1_700_000_000_123);

        let hello: AttendeeHello = serde_json::from_str(r#"{"clientTime": 42}"#).unwrap();
        assert_eq!(hello.client_time, 42);

        assert!(serde_json::from_str::<AttendeeHello>(r#"{"clientTime": "soon"}"#).is_err());
    }

    #[test]
    fn test_scan_submission() {
        let scan: ScanSubmission = serde_json::from_str(
            r#"{"sessionId": 5, "scannedCodeId": 4294967295, "scannedAt": "1250", "studentId": "S101"}"#,
        )
        .unwrap();
        assert_eq!(scan.session_id, SessionId(5));
        assert_eq!(scan.scanned_code_id, CodeId(u32::MAX));
        assert_eq!(scan.scanned_at, 1_250);
        assert_eq!(scan.student_id, "S101");
    }

    #[test]
    fn test_render_report_accepts_legacy_field() {
        let report: RenderReport =
            serde_json::from_str(r#"{"type": "RENDER_LATENCY", "renderMillis": 25}"#).unwrap();
        assert_eq!(report.render_millis, 25);

        let report: RenderReport = serde_json::from_str(r#"{"message": 30}"#).unwrap();
        assert_eq!(report.render_millis, 30);
        assert_eq!(report.kind, None);
    }

    #[test]
    fn test_toggle_request() {
        let request: PresenterRequest =
            serde_json::from_str(r#"{"type": "TOGGLE_ATTENDANCE", "studentId": "S7"}"#).unwrap();
        assert_eq!(
            request,
            PresenterRequest::ToggleAttendance {
                student_id: "S7".to_string()
            }
        );

        assert!(serde_json::from_str::<PresenterRequest>(r#"{"type": "DANCE"}"#).is_err());
    }
}
