//! WebSocket routes.
//!
//! - `GET /create-attendance-session?classroom=<id>` - presenter socket
//!   (`table` is accepted as an alias for `classroom`)
//! - `GET /scan-qr` - attendee socket
//!
//! Upgrades are refused with 403 unless the `Origin` header is on the
//! allow-list. An allow-list entry of `*` accepts any origin.

use crate::actors::{ActorMetrics, SessionRegistryHandle};
use crate::config::EngineSettings;
use crate::signaling::{run_attendee, run_presenter};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, Request, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use common::clock::Clock;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

type TextSink = Pin<Box<dyn Sink<String, Error = axum::Error> + Send>>;
type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Shared state for the WebSocket routes.
#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistryHandle,
    pub settings: EngineSettings,
    pub metrics: Arc<ActorMetrics>,
    pub clock: Arc<dyn Clock>,
    pub allowed_origins: Arc<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PresenterQuery {
    #[serde(alias = "table")]
    pub classroom: String,
}

/// Build the WebSocket router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/create-attendance-session", get(presenter_upgrade))
        .route("/scan-qr", get(attendee_upgrade))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_allowed_origin,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Whether the request's `Origin` is on the allow-list.
///
/// Requests without an `Origin` header are refused.
pub fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    let Some(origin) = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    allowed
        .iter()
        .any(|entry| entry == "*" || entry.eq_ignore_ascii_case(origin))
}

/// Refuse the upgrade before any extractor runs.
async fn require_allowed_origin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !origin_allowed(&state.allowed_origins, request.headers()) {
        warn!(
            target: "attendance.signaling.http",
            origin = ?request.headers().get(header::ORIGIN),
            "WebSocket upgrade refused: origin not allowed"
        );
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(request).await
}

async fn presenter_upgrade(
    State(state): State<AppState>,
    Query(query): Query<PresenterQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = text_frames(socket);
        if let Err(e) = run_presenter(
            sink,
            stream,
            query.classroom,
            state.registry,
            state.settings,
            state.metrics,
        )
        .await
        {
            debug!(
                target: "attendance.signaling.http",
                error = %e,
                "Presenter connection ended with error"
            );
        }
    })
}

async fn attendee_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let started = Instant::now();
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = text_frames(socket);
        if let Err(e) = run_attendee(
            sink,
            stream,
            state.registry,
            state.clock,
            state.settings,
            state.metrics,
            started,
        )
        .await
        {
            debug!(
                target: "attendance.signaling.http",
                error = %e,
                "Attendee connection ended with error"
            );
        }
    })
}

/// Adapt a WebSocket to text frames.
///
/// The stream ends at the first close frame or transport error; binary and
/// ping/pong frames are skipped.
fn text_frames(socket: WebSocket) -> (TextSink, TextStream) {
    let (sink, stream) = socket.split();

    let sink = sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
    let stream = stream
        .take_while(|message| {
            future::ready(matches!(message, Ok(m) if !matches!(m, Message::Close(_))))
        })
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(text),
                _ => None,
            })
        });

    (Box::pin(sink), Box::pin(stream))
}
