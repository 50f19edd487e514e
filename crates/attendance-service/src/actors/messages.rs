//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::attendance::AttendanceSnapshot;
use crate::clock_sync::AttendeeTiming;
use crate::errors::EngineError;
use crate::model::{Code, ScanAttempt, SessionView, Student};
use crate::signaling::wire::OutboundFrame;
use crate::validation::AcceptedScan;

use super::session::SessionActorHandle;

use common::types::SessionId;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Messages sent to `SessionRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Spawn a session actor for an already-fetched roster.
    CreateSession {
        classroom_id: String,
        students: Vec<Student>,
        render_latency_ms: i64,
        respond_to: oneshot::Sender<Result<CreatedSession, EngineError>>,
    },

    /// Look up a live session.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionActorHandle, EngineError>>,
    },

    /// Tear a session down. Unknown ids are a no-op.
    RemoveSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<()>,
    },

    /// Registry status (for readiness reporting).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting sessions and cancel every live one.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Install a fresh code, archiving the current one.
    Rotate {
        respond_to: oneshot::Sender<Result<Code, EngineError>>,
    },

    /// Validate a scan and, if accepted, mark the student present.
    SubmitScan {
        attempt: ScanAttempt,
        timing: AttendeeTiming,
        respond_to: oneshot::Sender<Result<AcceptedScan, EngineError>>,
    },

    /// Mark a student present without a scan.
    MarkPresent {
        student_id: String,
        /// `true` if presence changed.
        respond_to: oneshot::Sender<Result<bool, EngineError>>,
    },

    /// Flip a student's presence.
    ToggleAttendance {
        student_id: String,
        /// New presence.
        respond_to: oneshot::Sender<Result<bool, EngineError>>,
    },

    GetAttendance {
        respond_to: oneshot::Sender<AttendanceSnapshot>,
    },

    GetSnapshot {
        respond_to: oneshot::Sender<SessionView>,
    },

    /// Take the receiving end of the notification pipe.
    Subscribe {
        respond_to: oneshot::Sender<Result<mpsc::Receiver<AttendanceSnapshot>, EngineError>>,
    },

    /// Close the notification pipe.
    Unsubscribe { respond_to: oneshot::Sender<()> },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write a frame to the client.
    Send { frame: OutboundFrame },

    /// Close the connection.
    Close,
}

/// A freshly created session.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: SessionId,
    /// Roster with every student absent.
    pub students: Vec<Student>,
    pub handle: SessionActorHandle,
}

/// Registry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub session_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
