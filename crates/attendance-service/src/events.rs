//! Per-session attendance notification pipe.
//!
//! Each session owns one bounded pipe. Publishing never waits: when the pipe
//! is full the newest snapshot is dropped, the drop is counted, and the bus
//! is flagged for resync so the owning actor can publish the current state
//! once the subscriber catches up. Every delivered snapshot is a complete,
//! internally consistent view, so a subscriber that misses intermediate
//! states still converges on the final one.

use crate::attendance::AttendanceSnapshot;
use crate::observability::metrics as prom;
use common::types::SessionId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Result of a non-blocking publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Enqueued for the subscriber.
    Delivered,
    /// Pipe full; snapshot discarded.
    Dropped,
    /// Pipe closed (session tearing down or subscriber gone).
    Closed,
}

/// Bounded snapshot pipe for one session.
#[derive(Debug)]
pub struct EventBus {
    session_id: SessionId,
    sender: Option<mpsc::Sender<AttendanceSnapshot>>,
    /// Held until the presenter subscribes.
    receiver: Option<mpsc::Receiver<AttendanceSnapshot>>,
    dropped: u64,
    resync_pending: bool,
}

impl EventBus {
    /// Create an open pipe with `capacity` slots.
    ///
    /// A zero capacity is raised to one.
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            session_id,
            sender: Some(sender),
            receiver: Some(receiver),
            dropped: 0,
            resync_pending: false,
        }
    }

    /// Hand out the receiving end. Only the first caller gets it.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<AttendanceSnapshot>> {
        self.receiver.take()
    }

    /// Attempt delivery without waiting.
    pub fn publish(&mut self, snapshot: AttendanceSnapshot) -> PublishOutcome {
        let Some(sender) = &self.sender else {
            return PublishOutcome::Closed;
        };

        match sender.try_send(snapshot) {
            Ok(()) => {
                self.resync_pending = false;
                PublishOutcome::Delivered
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                self.resync_pending = true;
                prom::record_snapshot_dropped();
                warn!(
                    target: "attendance.events",
                    session_id = %self.session_id,
                    dropped_total = self.dropped,
                    "Event channel full, dropping notification"
                );
                PublishOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "attendance.events",
                    session_id = %self.session_id,
                    "Event channel closed, subscriber gone"
                );
                self.sender = None;
                self.resync_pending = false;
                PublishOutcome::Closed
            }
        }
    }

    /// Whether a dropped snapshot is owed and the pipe now has room.
    pub fn needs_resync(&self) -> bool {
        self.resync_pending
            && self
                .sender
                .as_ref()
                .is_some_and(|sender| sender.capacity() > 0)
    }

    /// Close the pipe. The subscriber drains what is buffered, then sees the end.
    pub fn close(&mut self) {
        self.sender = None;
        self.receiver = None;
        self.resync_pending = false;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_none()
    }

    /// Snapshots dropped since the pipe was created.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
