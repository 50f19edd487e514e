//! Presenter connection flow.
//!
//! 1. Calibrate: latency probe, then the client's render report
//! 2. Create the session and send the roster
//! 3. Run three legs under one cancellation scope:
//!    - the code rotator, pushing a fresh code every tick
//!    - the snapshot forwarder, pushing attendance updates
//!    - the request reader, answering manual toggles
//! 4. When any leg ends, stop the others, flush and close the connection,
//!    unsubscribe and delete the session
//!
//! All three legs write through one `ConnectionActor`, so frames never
//! interleave mid-write. The legs run on a child of the connection's scope:
//! a failed write stops everything, while stopping the legs still lets the
//! connection flush what they queued.

use super::wire::{OutboundFrame, PresenterRequest, SessionCreated, StatusReply};
use super::{send_frame, send_status, ConnectionGuard};
use crate::actors::{
    ActorMetrics, ConnectionActor, ConnectionActorHandle, SessionActorHandle,
    SessionRegistryHandle,
};
use crate::attendance::AttendanceSnapshot;
use crate::clock_sync::calibrate_presenter;
use crate::config::EngineSettings;
use crate::errors::EngineError;
use crate::rotation::CodeRotator;
use common::types::SessionId;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long teardown waits for each presenter task.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const TOGGLE_OK: &str = "Attendance toggled successfully";
const INVALID_REQUEST: &str = "Invalid request";

/// Serve one presenter connection until it closes.
///
/// # Errors
///
/// Returns the error that ended the flow before the session started
/// (handshake or session creation). Once the session is live the flow
/// always tears down cleanly and returns `Ok`.
#[instrument(skip_all, name = "attendance.signaling.presenter", fields(classroom_id = %classroom_id))]
pub async fn run_presenter<S, R>(
    mut sink: S,
    mut stream: R,
    classroom_id: String,
    registry: SessionRegistryHandle,
    settings: EngineSettings,
    metrics: Arc<ActorMetrics>,
) -> Result<(), EngineError>
where
    S: Sink<String> + Unpin + Send + 'static,
    S::Error: Display,
    R: Stream<Item = String> + Unpin,
{
    let _guard = ConnectionGuard::open(metrics);

    let calibration =
        match calibrate_presenter(&mut sink, &mut stream, settings.handshake_timeout).await {
            Ok(calibration) => calibration,
            Err(e) => {
                warn!(
                    target: "attendance.signaling.presenter",
                    error = %e,
                    "Presenter handshake failed"
                );
                let _ = sink.close().await;
                return Err(e);
            }
        };

    let created = match registry
        .create_session(&classroom_id, calibration.render_latency_estimate_ms)
        .await
    {
        Ok(created) => created,
        Err(e) => {
            warn!(
                target: "attendance.signaling.presenter",
                error = %e,
                "Session creation failed"
            );
            let _ = send_status(&mut sink, StatusReply::error(e.client_message())).await;
            let _ = sink.close().await;
            return Err(e);
        }
    };
    let session = created.handle;
    let session_id = created.session_id;

    info!(
        target: "attendance.signaling.presenter",
        session_id = %session_id,
        network_latency_ms = calibration.network_latency_ms,
        render_millis = calibration.render_millis,
        "Presenter session started"
    );

    let announcement = OutboundFrame::SessionCreated(SessionCreated {
        session_id,
        students: created.students,
    });
    if let Err(e) = send_frame(&mut sink, &announcement).await {
        debug!(
            target: "attendance.signaling.presenter",
            session_id = %session_id,
            error = %e,
            "Presenter gone before session announcement"
        );
        let _ = registry.delete_session(session_id).await;
        return Ok(());
    }

    let snapshots = match session.subscribe().await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(
                target: "attendance.signaling.presenter",
                session_id = %session_id,
                error = %e,
                "Subscribe failed"
            );
            let _ = registry.delete_session(session_id).await;
            return Ok(());
        }
    };

    // Ends with the session as well as with the connection
    let scope = session.child_token();
    let legs = scope.child_token();

    let (connection, connection_task) =
        ConnectionActor::spawn(uuid::Uuid::new_v4().to_string(), sink, scope.clone());

    let rotator = CodeRotator::spawn(
        session.clone(),
        connection.clone(),
        settings.rotation_period,
        legs.clone(),
    );
    let forwarder = tokio::spawn(forward_snapshots(
        snapshots,
        connection.clone(),
        legs.clone(),
    ));

    read_requests(&mut stream, &session, &connection, &legs).await;

    // Teardown
    legs.cancel();
    for (name, task) in [("rotator", rotator), ("forwarder", forwarder)] {
        await_task(session_id, name, task).await;
    }
    // Frames already queued reach the client before the socket closes
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, connection.close())
        .await
        .is_err()
    {
        debug!(
            target: "attendance.signaling.presenter",
            session_id = %session_id,
            "Connection mailbox stuck, closing without flush"
        );
        scope.cancel();
    }
    await_task(session_id, "connection", connection_task).await;
    scope.cancel();

    let _ = session.unsubscribe().await;
    let _ = registry.delete_session(session_id).await;

    info!(
        target: "attendance.signaling.presenter",
        session_id = %session_id,
        connection_id = %connection.connection_id(),
        frames_dropped = connection.frames_dropped(),
        "Presenter session ended"
    );
    Ok(())
}

async fn await_task(session_id: SessionId, name: &'static str, task: JoinHandle<()>) {
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await.is_err() {
        warn!(
            target: "attendance.signaling.presenter",
            session_id = %session_id,
            task = name,
            "Presenter task shutdown timed out"
        );
    }
}

/// Push every snapshot from the session to the presenter.
async fn forward_snapshots(
    mut snapshots: mpsc::Receiver<AttendanceSnapshot>,
    connection: ConnectionActorHandle,
    scope: CancellationToken,
) {
    loop {
        tokio::select! {
            () = scope.cancelled() => break,

            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else {
                    // Pipe closed: the session is gone
                    scope.cancel();
                    break;
                };
                if connection.send(OutboundFrame::Update(snapshot.into())).await.is_err() {
                    scope.cancel();
                    break;
                }
            }
        }
    }
}

/// Answer presenter requests until the client closes or the scope ends.
async fn read_requests<R>(
    stream: &mut R,
    session: &SessionActorHandle,
    connection: &ConnectionActorHandle,
    scope: &CancellationToken,
) where
    R: Stream<Item = String> + Unpin,
{
    loop {
        tokio::select! {
            () = scope.cancelled() => break,

            frame = stream.next() => {
                let Some(text) = frame else {
                    debug!(
                        target: "attendance.signaling.presenter",
                        session_id = %session.session_id(),
                        "Presenter closed the connection"
                    );
                    break;
                };
                let reply = handle_request(session, &text).await;
                if connection.send(OutboundFrame::Status(reply)).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_request(session: &SessionActorHandle, text: &str) -> StatusReply {
    let request: PresenterRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(
                target: "attendance.signaling.presenter",
                session_id = %session.session_id(),
                error = %e,
                "Unreadable presenter request"
            );
            return StatusReply::error(INVALID_REQUEST);
        }
    };

    match request {
        PresenterRequest::ToggleAttendance { student_id } => {
            match session.toggle_attendance(student_id).await {
                Ok(_) => StatusReply::ok(TOGGLE_OK),
                Err(e) => StatusReply::error(e.client_message()),
            }
        }
    }
}
