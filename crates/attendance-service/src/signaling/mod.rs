//! Presenter and attendee connection flows.
//!
//! Both flows are written against `Sink<String>` / `Stream<Item = String>`
//! text frames. The HTTP layer adapts an axum WebSocket to that shape;
//! tests drive the same code over in-memory channels.
//!
//! - [`presenter`] - calibration, session creation, code pushes, live
//!   attendance and manual toggles
//! - [`attendee`] - clock sync, then scan submissions until one is accepted
//! - [`wire`] - JSON frame types

pub mod attendee;
pub mod presenter;
pub mod wire;

pub use attendee::run_attendee;
pub use presenter::run_presenter;

use crate::actors::ActorMetrics;
use crate::errors::EngineError;
use crate::signaling::wire::{OutboundFrame, StatusReply};
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;

/// Counts a connection for as long as it is held.
struct ConnectionGuard {
    metrics: Arc<ActorMetrics>,
}

impl ConnectionGuard {
    fn open(metrics: Arc<ActorMetrics>) -> Self {
        metrics.connection_opened();
        Self { metrics }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.metrics.connection_closed();
    }
}

/// Write a frame straight to a socket the caller owns.
async fn send_frame<S>(sink: &mut S, frame: &OutboundFrame) -> Result<(), EngineError>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    let text = frame
        .to_json()
        .map_err(|e| EngineError::Internal(format!("frame encode failed: {e}")))?;
    sink.send(text)
        .await
        .map_err(|e| EngineError::Internal(format!("write to client failed: {e}")))
}

async fn send_status<S>(sink: &mut S, reply: StatusReply) -> Result<(), EngineError>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    send_frame(sink, &OutboundFrame::Status(reply)).await
}
