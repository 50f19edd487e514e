//! In-memory text socket.
//!
//! The connection flows only need `Sink<String>` and `Stream<Item = String>`,
//! so a pair of bounded channels stands in for a WebSocket. The server half
//! goes to `run_presenter` / `run_attendee`; the test drives the client half.
//!
//! Dropping the client (or calling [`MockClient::hang_up`]) ends the server's
//! stream, like a browser closing the tab.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

/// How long `recv_*` helpers wait before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

const SOCKET_BUFFER: usize = 64;

/// Server half of a mock socket.
pub struct ServerSide {
    pub sink: PollSender<String>,
    pub stream: ReceiverStream<String>,
}

/// Client half of a mock socket.
pub struct MockClient {
    tx: Option<mpsc::Sender<String>>,
    rx: mpsc::Receiver<String>,
}

/// Factory for connected server/client pairs.
pub struct MockSocket;

impl MockSocket {
    #[must_use]
    pub fn pair() -> (ServerSide, MockClient) {
        let (server_tx, client_rx) = mpsc::channel(SOCKET_BUFFER);
        let (client_tx, server_rx) = mpsc::channel(SOCKET_BUFFER);
        (
            ServerSide {
                sink: PollSender::new(server_tx),
                stream: ReceiverStream::new(server_rx),
            },
            MockClient {
                tx: Some(client_tx),
                rx: client_rx,
            },
        )
    }
}

impl MockClient {
    /// Send a raw text frame.
    ///
    /// # Panics
    ///
    /// Panics if the client already hung up or the server dropped its stream.
    pub async fn send_text(&self, text: impl Into<String>) {
        self.tx
            .as_ref()
            .expect("client already hung up")
            .send(text.into())
            .await
            .expect("server stopped reading");
    }

    /// Send a JSON frame.
    pub async fn send_json(&self, value: &Value) {
        self.send_text(value.to_string()).await;
    }

    /// Receive the next frame as JSON.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within [`RECV_TIMEOUT`], the socket closed,
    /// or the frame is not JSON.
    pub async fn recv_json(&mut self) -> Value {
        let text = tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a server frame")
            .expect("server closed the socket");
        serde_json::from_str(&text).expect("server frame is not JSON")
    }

    /// Receive frames until one satisfies `predicate`, discarding the rest.
    pub async fn recv_until(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        loop {
            let frame = self.recv_json().await;
            if predicate(&frame) {
                return frame;
            }
        }
    }

    /// Next frame if one arrives within `wait`.
    pub async fn try_recv_json(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(text)) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    /// Wait for the server to close, discarding any frames still queued.
    ///
    /// # Panics
    ///
    /// Panics if the server keeps the socket open past [`RECV_TIMEOUT`].
    pub async fn expect_closed(&mut self) {
        tokio::time::timeout(RECV_TIMEOUT, async {
            while self.rx.recv().await.is_some() {}
        })
        .await
        .expect("server did not close the socket");
    }

    /// Close the client's sending side.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}

/// Whether `frame` is a rotating code push.
#[must_use]
pub fn is_code_frame(frame: &Value) -> bool {
    frame.get("id").is_some() && frame.get("expiredAt").is_some()
}

/// Whether `frame` is an attendance update.
#[must_use]
pub fn is_update_frame(frame: &Value) -> bool {
    frame["type"] == "ATTENDANCE_UPDATE"
}

/// Whether `frame` is a `{status, message}` reply.
#[must_use]
pub fn is_status_frame(frame: &Value) -> bool {
    frame.get("status").is_some()
}
