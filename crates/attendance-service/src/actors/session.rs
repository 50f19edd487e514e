//! `SessionActor` - per-session actor that owns one attendance session.
//!
//! Each `SessionActor`:
//! - Owns the roster, the current code and the code history
//! - Serializes every mutation (rotation, scans, manual toggles)
//! - Publishes an attendance snapshot after every presence change
//!
//! # Notification delivery
//!
//! Snapshots go through the session's [`EventBus`] without waiting. When
//! the presenter falls behind and a snapshot is dropped, the resync tick
//! republishes the current state as soon as the pipe has room, so the
//! presenter always ends up with the latest attendance.

use crate::attendance::{self, AttendanceSnapshot};
use crate::clock_sync::AttendeeTiming;
use crate::config::EngineSettings;
use crate::errors::EngineError;
use crate::events::EventBus;
use crate::model::{Code, ScanAttempt, SessionState, SessionView};
use crate::observability::metrics as prom;
use crate::rotation::CodeMinter;
use crate::validation::{self, AcceptedScan, ScanRejection};

use super::messages::SessionMessage;
use super::metrics::{ActorType, MailboxMonitor};

use common::clock::Clock;
use common::types::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// Handle to a `SessionActor`.
///
/// Once the actor has stopped every request fails with
/// `EngineError::SessionNotFound`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| EngineError::SessionNotFound(self.session_id))?;
        rx.await
            .map_err(|_| EngineError::SessionNotFound(self.session_id))
    }

    /// Archive the current code and install a fresh one.
    pub async fn rotate_code(&self) -> Result<Code, EngineError> {
        self.request(|respond_to| SessionMessage::Rotate { respond_to })
            .await?
    }

    /// Validate a scan and mark the student present if it passes.
    pub async fn submit_scan(
        &self,
        attempt: ScanAttempt,
        timing: AttendeeTiming,
    ) -> Result<AcceptedScan, EngineError> {
        self.request(|respond_to| SessionMessage::SubmitScan {
            attempt,
            timing,
            respond_to,
        })
        .await?
    }

    /// Mark a student present. Returns `false` if they already were.
    pub async fn mark_present(&self, student_id: String) -> Result<bool, EngineError> {
        self.request(|respond_to| SessionMessage::MarkPresent {
            student_id,
            respond_to,
        })
        .await?
    }

    /// Flip a student's presence. Returns the new presence.
    pub async fn toggle_attendance(&self, student_id: String) -> Result<bool, EngineError> {
        self.request(|respond_to| SessionMessage::ToggleAttendance {
            student_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_attendance(&self) -> Result<AttendanceSnapshot, EngineError> {
        self.request(|respond_to| SessionMessage::GetAttendance { respond_to })
            .await
    }

    pub async fn get_snapshot(&self) -> Result<SessionView, EngineError> {
        self.request(|respond_to| SessionMessage::GetSnapshot { respond_to })
            .await
    }

    /// Take the session's notification receiver. Only one subscriber is allowed.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<AttendanceSnapshot>, EngineError> {
        self.request(|respond_to| SessionMessage::Subscribe { respond_to })
            .await?
    }

    /// Close the notification pipe.
    pub async fn unsubscribe(&self) -> Result<(), EngineError> {
        self.request(|respond_to| SessionMessage::Unsubscribe { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token for tasks that must stop with this session.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Child of the registry's token.
    cancel_token: CancellationToken,
    state: SessionState,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    minter: CodeMinter,
    bus: EventBus,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a session actor.
    ///
    /// The initial snapshot (everyone absent) is queued before the actor
    /// starts, so the first subscriber always receives it.
    pub fn spawn(
        state: SessionState,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
        cancel_token: CancellationToken,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let session_id = state.id();
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let mut bus = EventBus::new(session_id, settings.event_buffer);
        bus.publish(AttendanceSnapshot::from_roster(state.roster()));

        let actor = Self {
            session_id,
            receiver,
            cancel_token: cancel_token.clone(),
            state,
            settings,
            clock,
            minter: CodeMinter::new(),
            bus,
            mailbox: MailboxMonitor::new(ActorType::Session, session_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "attendance.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "attendance.actor.session",
            session_id = %self.session_id,
            classroom_id = %self.state.classroom_id(),
            students = self.state.roster().len(),
            "SessionActor started"
        );

        let mut resync = tokio::time::interval(
            self.settings
                .resync_interval
                .max(Duration::from_millis(1)),
        );
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "attendance.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                _ = resync.tick() => {
                    if self.bus.needs_resync() {
                        debug!(
                            target: "attendance.actor.session",
                            session_id = %self.session_id,
                            "Republishing attendance after dropped notification"
                        );
                        self.publish();
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "attendance.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "attendance.actor.session",
            session_id = %self.session_id,
            present = self.state.roster().iter().filter(|s| s.is_present).count(),
            codes_issued = self.state.past_codes().len() + usize::from(self.state.current_code().is_some()),
            dropped_notifications = self.bus.dropped(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Rotate { respond_to } => {
                let _ = respond_to.send(self.handle_rotate());
            }

            SessionMessage::SubmitScan {
                attempt,
                timing,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_scan(&attempt, &timing));
            }

            SessionMessage::MarkPresent {
                student_id,
                respond_to,
            } => {
                let result = attendance::mark_present(&mut self.state, &student_id);
                if matches!(result, Ok(true)) {
                    self.publish();
                }
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleAttendance {
                student_id,
                respond_to,
            } => {
                let result = attendance::toggle(&mut self.state, &student_id);
                if let Ok(present) = result {
                    info!(
                        target: "attendance.actor.session",
                        session_id = %self.session_id,
                        student_id = %student_id,
                        present,
                        "Attendance toggled"
                    );
                    self.publish();
                }
                let _ = respond_to.send(result);
            }

            SessionMessage::GetAttendance { respond_to } => {
                let _ = respond_to.send(AttendanceSnapshot::from_roster(self.state.roster()));
            }

            SessionMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.state.view());
            }

            SessionMessage::Subscribe { respond_to } => {
                let result = self.bus.subscribe().ok_or_else(|| {
                    EngineError::Internal("session already has a subscriber".to_string())
                });
                let _ = respond_to.send(result);
            }

            SessionMessage::Unsubscribe { respond_to } => {
                self.bus.close();
                let _ = respond_to.send(());
            }
        }
    }

    fn handle_rotate(&mut self) -> Result<Code, EngineError> {
        let now = self.clock.now_millis();
        let minter = &self.minter;
        let code = self
            .state
            .rotate(now, self.settings.rotation_period_ms(), || minter.mint())?;
        prom::record_code_rotation();
        Ok(code)
    }

    fn handle_scan(
        &mut self,
        attempt: &ScanAttempt,
        timing: &AttendeeTiming,
    ) -> Result<AcceptedScan, EngineError> {
        if attempt.session_id != self.session_id {
            return Err(EngineError::SessionNotFound(attempt.session_id));
        }

        let accepted = match validation::validate(
            attempt,
            &self.state,
            timing,
            self.settings.scan_tolerance_ms,
        ) {
            Ok(accepted) => accepted,
            Err(rejection) => {
                prom::record_scan(rejection.as_label());
                if let ScanRejection::CodeExpired { delta_ms } = rejection {
                    prom::record_scan_delta(delta_ms);
                }
                debug!(
                    target: "attendance.actor.session",
                    session_id = %self.session_id,
                    student_id = %attempt.student_id,
                    code_id = %attempt.code_id,
                    reason = %rejection,
                    "Scan rejected"
                );
                return Err(rejection.into());
            }
        };

        match attendance::mark_present(&mut self.state, &attempt.student_id) {
            Ok(true) => {
                prom::record_scan("accepted");
                prom::record_scan_delta(accepted.delta_ms);
                info!(
                    target: "attendance.actor.session",
                    session_id = %self.session_id,
                    student_id = %attempt.student_id,
                    code_id = %accepted.code_id,
                    delta_ms = accepted.delta_ms,
                    "Student marked present"
                );
                self.publish();
                Ok(accepted)
            }
            Ok(false) => {
                prom::record_scan(ScanRejection::AlreadyPresent.as_label());
                Err(EngineError::AlreadyPresent)
            }
            Err(e) => {
                prom::record_scan("unknown_student");
                debug!(
                    target: "attendance.actor.session",
                    session_id = %self.session_id,
                    student_id = %attempt.student_id,
                    "Scan from student outside the roster"
                );
                Err(e)
            }
        }
    }

    fn publish(&mut self) {
        let snapshot = AttendanceSnapshot::from_roster(self.state.roster());
        self.bus.publish(snapshot);
    }

    fn graceful_shutdown(&mut self) {
        self.bus.close();
        info!(
            target: "attendance.actor.session",
            session_id = %self.session_id,
            "Graceful shutdown complete"
        );
    }
}
