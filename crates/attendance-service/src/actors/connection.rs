//! `ConnectionActor` - owns the outbound half of one presenter socket.
//!
//! Each `ConnectionActor`:
//! - Is the only writer to its socket; the rotator, the snapshot forwarder
//!   and toggle replies all go through its mailbox
//! - Serializes frames to JSON text
//! - Cancels the presenter scope when a write fails
//!
//! # Lifecycle
//!
//! 1. Spawned after the presenter's session is created
//! 2. Runs until the socket fails, `close()` is called, or its token is cancelled
//! 3. Closes the sink on exit

use crate::errors::EngineError;
use crate::signaling::wire::OutboundFrame;

use super::messages::ConnectionMessage;
use super::metrics::{ActorType, MailboxMonitor};

use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a frame, waiting for mailbox space.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), EngineError> {
        self.sender
            .send(ConnectionMessage::Send { frame })
            .await
            .map_err(|e| EngineError::Internal(format!("channel send failed: {e}")))
    }

    /// Queue a frame without waiting.
    ///
    /// Returns `Ok(false)` if the mailbox is full and the frame was dropped.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<bool, EngineError> {
        match self.sender.try_send(ConnectionMessage::Send { frame }) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => Err(EngineError::Internal(
                "connection mailbox closed".to_string(),
            )),
        }
    }

    /// Flush queued frames, then close the socket.
    pub async fn close(&self) -> Result<(), EngineError> {
        self.sender
            .send(ConnectionMessage::Close)
            .await
            .map_err(|e| EngineError::Internal(format!("channel send failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Frames refused by `try_send` because the mailbox was full.
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.mailbox.messages_dropped()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S> {
    connection_id: String,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    sink: S,
    frames_sent: u64,
    mailbox: Arc<MailboxMonitor>,
}

impl<S> ConnectionActor<S>
where
    S: Sink<String> + Unpin + Send + 'static,
    S::Error: Display,
{
    /// Spawn a connection actor writing to `sink`.
    ///
    /// `cancel_token` should be the presenter scope token: a failed write
    /// cancels it.
    pub fn spawn(
        connection_id: String,
        sink: S,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, &connection_id));

        let actor = Self {
            connection_id: connection_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
            frames_sent: 0,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "attendance.actor.connection", fields(connection_id = %self.connection_id))]
    async fn run(mut self) {
        debug!(
            target: "attendance.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "attendance.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ConnectionMessage::Send { frame }) => {
                            self.mailbox.record_enqueue();
                            let written = self.write(&frame).await;
                            self.mailbox.record_dequeue();
                            if !written {
                                self.cancel_token.cancel();
                                break;
                            }
                        }
                        Some(ConnectionMessage::Close) | None => break,
                    }
                }
            }
        }

        if let Err(e) = self.sink.close().await {
            debug!(
                target: "attendance.actor.connection",
                connection_id = %self.connection_id,
                error = %e,
                "Sink close failed"
            );
        }

        info!(
            target: "attendance.actor.connection",
            connection_id = %self.connection_id,
            frames_sent = self.frames_sent,
            frames_dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Write one frame. Returns false if the socket is unusable.
    async fn write(&mut self, frame: &OutboundFrame) -> bool {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "attendance.actor.connection",
                    connection_id = %self.connection_id,
                    kind = frame.kind(),
                    error = %e,
                    "Frame encode failed, skipping"
                );
                return true;
            }
        };

        match self.sink.send(text).await {
            Ok(()) => {
                self.frames_sent += 1;
                true
            }
            Err(e) => {
                warn!(
                    target: "attendance.actor.connection",
                    connection_id = %self.connection_id,
                    kind = frame.kind(),
                    error = %e,
                    "Write to client failed, closing connection"
                );
                false
            }
        }
    }
}
