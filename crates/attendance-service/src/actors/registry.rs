//! `SessionRegistryActor` - singleton supervisor for session actors.
//!
//! The registry is the top-level actor of the engine:
//!
//! - Singleton per service instance
//! - Owns the arena of live sessions keyed by `SessionId`
//! - Handles session creation and removal
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors session actor health (panic detection via `JoinHandle`)
//!
//! The registry only routes. Every read and write of a session's state is
//! serialized by that session's own actor, so sessions never contend with
//! each other.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the registry:
//! 1. Stops accepting new sessions
//! 2. Cancels the root `CancellationToken` (propagates to every session)
//! 3. Waits for session actors to finish, up to the shutdown deadline

use crate::attendance::AttendanceSnapshot;
use crate::clock_sync::AttendeeTiming;
use crate::config::EngineSettings;
use crate::errors::EngineError;
use crate::model::{ScanAttempt, SessionState, SessionView, Student};
use crate::roster::RosterProvider;
use crate::validation::AcceptedScan;

use super::messages::{CreatedSession, RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionActorHandle};

use common::clock::Clock;
use common::types::SessionId;
use ring::rand::SystemRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Draws for an unused session id before giving up.
const MAX_SESSION_ID_ATTEMPTS: usize = 8;

/// How long a removed session actor gets to finish.
const SESSION_REMOVAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Shutdown deadline when the root token is cancelled directly.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// How often the registry reaps session actors that stopped on their own.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the `SessionRegistryActor`.
///
/// This is the engine's public interface. Session-scoped calls look the
/// session up and then talk to its actor directly.
#[derive(Clone)]
pub struct SessionRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    roster: Arc<dyn RosterProvider>,
}

impl SessionRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(
        roster: Arc<dyn RosterProvider>,
        settings: EngineSettings,
        metrics: Arc<ActorMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionRegistryActor::new(
            receiver,
            cancel_token.clone(),
            settings,
            metrics,
            clock,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            roster,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        // The registry only stops after a shutdown request
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| EngineError::Draining)?;
        rx.await
            .map_err(|e| EngineError::Internal(format!("response receive failed: {e}")))
    }

    /// Fetch the classroom roster and start a session for it.
    ///
    /// # Errors
    ///
    /// - `RosterRetrievalFailed` if the roster source cannot resolve `classroom_id`
    /// - `CapacityExceeded` / `Draining` if the registry refuses new sessions
    pub async fn create_session(
        &self,
        classroom_id: &str,
        render_latency_ms: i64,
    ) -> Result<CreatedSession, EngineError> {
        // Roster I/O happens outside the registry loop so a slow source
        // does not stall lookups for other sessions.
        let students = self.roster.get_students(classroom_id).await?;

        self.request(|respond_to| RegistryMessage::CreateSession {
            classroom_id: classroom_id.to_string(),
            students,
            render_latency_ms,
            respond_to,
        })
        .await?
    }

    /// Tear a session down. Unknown ids are a no-op.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<(), EngineError> {
        self.request(|respond_to| RegistryMessage::RemoveSession {
            session_id,
            respond_to,
        })
        .await
    }

    /// Look up a live session.
    pub async fn session(&self, session_id: SessionId) -> Result<SessionActorHandle, EngineError> {
        self.request(|respond_to| RegistryMessage::GetSession {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Validate a scan against its session and mark the student present.
    pub async fn submit_scan(
        &self,
        attempt: ScanAttempt,
        timing: AttendeeTiming,
    ) -> Result<AcceptedScan, EngineError> {
        self.session(attempt.session_id)
            .await?
            .submit_scan(attempt, timing)
            .await
    }

    /// Mark a student present. Returns `false` if they already were.
    pub async fn mark_present(
        &self,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<bool, EngineError> {
        self.session(session_id)
            .await?
            .mark_present(student_id.to_string())
            .await
    }

    /// Flip a student's presence. Returns the new presence.
    pub async fn toggle_attendance(
        &self,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<bool, EngineError> {
        self.session(session_id)
            .await?
            .toggle_attendance(student_id.to_string())
            .await
    }

    pub async fn get_attendance_list(
        &self,
        session_id: SessionId,
    ) -> Result<AttendanceSnapshot, EngineError> {
        self.session(session_id).await?.get_attendance().await
    }

    pub async fn get_snapshot(&self, session_id: SessionId) -> Result<SessionView, EngineError> {
        self.session(session_id).await?.get_snapshot().await
    }

    /// Take a session's notification receiver.
    pub async fn subscribe(
        &self,
        session_id: SessionId,
    ) -> Result<mpsc::Receiver<AttendanceSnapshot>, EngineError> {
        self.session(session_id).await?.subscribe().await
    }

    /// Close a session's notification pipe.
    pub async fn unsubscribe(&self, session_id: SessionId) -> Result<(), EngineError> {
        self.session(session_id).await?.unsubscribe().await
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, EngineError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting sessions and cancel every live one.
    ///
    /// Session actors get up to `deadline` to finish.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), EngineError> {
        self.request(|respond_to| RegistryMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
    classroom_id: String,
}

/// The `SessionRegistryActor` implementation.
pub struct SessionRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    sessions: HashMap<SessionId, ManagedSession>,
    accepting_new: bool,
    shutdown_deadline: Duration,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionRegistryActor {
    fn new(
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        settings: EngineSettings,
        metrics: Arc<ActorMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            receiver,
            cancel_token,
            sessions: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            settings,
            clock,
            rng: SystemRandom::new(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        }
    }

    #[instrument(skip_all, name = "attendance.actor.registry")]
    async fn run(mut self) {
        info!(
            target: "attendance.actor.registry",
            max_sessions = self.settings.max_sessions,
            "SessionRegistryActor started"
        );

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // Reap session actors that stopped on their own
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "attendance.actor.registry",
                        "SessionRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Reaping happens at the top of the loop
                _ = health_check.tick() => {}

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "attendance.actor.registry",
                                "SessionRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "attendance.actor.registry",
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionRegistryActor stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateSession {
                classroom_id,
                students,
                render_latency_ms,
                respond_to,
            } => {
                let result = self.create_session(classroom_id, students, render_latency_ms);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self
                    .sessions
                    .get(&session_id)
                    .map(|managed| managed.handle.clone())
                    .ok_or(EngineError::SessionNotFound(session_id));
                let _ = respond_to.send(result);
            }

            RegistryMessage::RemoveSession {
                session_id,
                respond_to,
            } => {
                self.remove_session(session_id);
                let _ = respond_to.send(());
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.initiate_shutdown(deadline);
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn create_session(
        &mut self,
        classroom_id: String,
        students: Vec<Student>,
        render_latency_ms: i64,
    ) -> Result<CreatedSession, EngineError> {
        if !self.accepting_new {
            return Err(EngineError::Draining);
        }
        if self.sessions.len() >= self.settings.max_sessions {
            warn!(
                target: "attendance.actor.registry",
                sessions = self.sessions.len(),
                "Session capacity reached"
            );
            return Err(EngineError::CapacityExceeded);
        }

        let session_id = self.unused_session_id()?;
        let state = SessionState::new(session_id, classroom_id.clone(), students, render_latency_ms);
        let roster = state.roster().to_vec();

        let (handle, task_handle) = SessionActor::spawn(
            state,
            self.settings.clone(),
            Arc::clone(&self.clock),
            self.cancel_token.child_token(),
        );

        self.sessions.insert(
            session_id,
            ManagedSession {
                handle: handle.clone(),
                task_handle,
                classroom_id: classroom_id.clone(),
            },
        );
        self.metrics.session_created();

        info!(
            target: "attendance.actor.registry",
            session_id = %session_id,
            classroom_id = %classroom_id,
            students = roster.len(),
            render_latency_ms,
            total_sessions = self.sessions.len(),
            "Session created"
        );

        Ok(CreatedSession {
            session_id,
            students: roster,
            handle,
        })
    }

    fn unused_session_id(&self) -> Result<SessionId, EngineError> {
        for _ in 0..MAX_SESSION_ID_ATTEMPTS {
            let candidate = SessionId::random(&self.rng)?;
            if !self.sessions.contains_key(&candidate) {
                return Ok(candidate);
            }
            debug!(
                target: "attendance.actor.registry",
                session_id = %candidate,
                "Session id collision, drawing again"
            );
        }
        Err(EngineError::Internal(format!(
            "no unused session id after {MAX_SESSION_ID_ATTEMPTS} attempts"
        )))
    }

    /// Cancel a session and reap its task in the background.
    fn remove_session(&mut self, session_id: SessionId) {
        let Some(ManagedSession {
            handle,
            task_handle,
            classroom_id,
        }) = self.sessions.remove(&session_id)
        else {
            debug!(
                target: "attendance.actor.registry",
                session_id = %session_id,
                "Remove for unknown session ignored"
            );
            return;
        };

        handle.cancel();

        tokio::spawn(async move {
            match tokio::time::timeout(SESSION_REMOVAL_TIMEOUT, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "attendance.actor.registry",
                        session_id = %session_id,
                        "Session actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "attendance.actor.registry",
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "attendance.actor.registry",
                        session_id = %session_id,
                        "Session actor task cleanup timed out"
                    );
                }
            }
        });

        self.metrics.session_removed();

        info!(
            target: "attendance.actor.registry",
            session_id = %session_id,
            classroom_id = %classroom_id,
            total_sessions = self.sessions.len(),
            "Session removed"
        );
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            session_count: self.sessions.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "attendance.actor.registry",
            session_count = self.sessions.len(),
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;
        self.cancel_token.cancel();
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "attendance.actor.registry",
            session_count = self.sessions.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        let deadline = Instant::now() + self.shutdown_deadline;
        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout_at(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "attendance.actor.registry",
                        session_id = %session_id,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "attendance.actor.registry",
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "attendance.actor.registry",
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
            self.metrics.session_removed();
        }

        info!(
            target: "attendance.actor.registry",
            "Graceful shutdown complete"
        );
    }

    /// Drop sessions whose actor task has finished without being removed.
    async fn check_session_health(&mut self) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(session_id, _)| *session_id)
            .collect();

        for session_id in finished {
            let Some(managed) = self.sessions.remove(&session_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "attendance.actor.registry",
                        session_id = %session_id,
                        "Session actor exited on its own"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "attendance.actor.registry",
                            session_id = %session_id,
                            classroom_id = %managed.classroom_id,
                            error = ?join_error,
                            "Session actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Session);
                    }
                }
            }

            self.metrics.session_removed();
        }
    }
}
