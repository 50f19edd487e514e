//! Clock-sync handshakes.
//!
//! Presenter: the server sends a probe and times the first reply; half the
//! round trip is taken as one-way latency. The client then reports how long
//! it takes to render a code, and the sum becomes the session's render
//! latency estimate.
//!
//! Attendee: the client reports its local clock once. The difference from
//! the server clock is the drift applied to every later scan, together with
//! the time the hello took to arrive.
//!
//! Both handshakes are written against `Sink<String>` / `Stream<Item = String>`
//! so they run unchanged over a WebSocket or an in-memory pipe.

use crate::errors::EngineError;
use crate::observability::metrics as prom;
use crate::signaling::wire::{AttendeeHello, LatencyProbe, OutboundFrame, RenderReport};
use common::clock::Clock;
use common::types::UnixMillis;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of the presenter handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterCalibration {
    pub network_latency_ms: i64,
    pub render_millis: i64,
    /// `network_latency_ms + render_millis`.
    pub render_latency_estimate_ms: i64,
}

/// Per-attendee timing, computed once and reused for every scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttendeeTiming {
    /// `server_now - client_reported_now`; positive when the client lags.
    pub clock_drift_ms: i64,
    pub latency_ms: i64,
}

fn whole_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Read the next text frame or fail the handshake.
pub(crate) async fn next_frame<R>(
    stream: &mut R,
    timeout: Duration,
    what: &str,
) -> Result<String, EngineError>
where
    R: Stream<Item = String> + Unpin,
{
    match tokio::time::timeout(timeout, stream.next()).await {
        Ok(Some(frame)) => Ok(frame),
        Ok(None) => Err(EngineError::Handshake(format!(
            "connection closed before {what}"
        ))),
        Err(_) => Err(EngineError::Handshake(format!("timed out waiting for {what}"))),
    }
}

async fn next_message<R, T>(stream: &mut R, timeout: Duration, what: &str) -> Result<T, EngineError>
where
    R: Stream<Item = String> + Unpin,
    T: DeserializeOwned,
{
    let frame = next_frame(stream, timeout, what).await?;
    serde_json::from_str(&frame).map_err(|e| EngineError::Handshake(format!("invalid {what}: {e}")))
}

/// Run the presenter handshake.
///
/// # Errors
///
/// Returns `EngineError::Handshake` if the probe cannot be sent, a reply
/// does not arrive within `timeout`, or the render report does not parse.
pub async fn calibrate_presenter<S, R>(
    sink: &mut S,
    stream: &mut R,
    timeout: Duration,
) -> Result<PresenterCalibration, EngineError>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
    R: Stream<Item = String> + Unpin,
{
    let probe = OutboundFrame::Probe(LatencyProbe::default())
        .to_json()
        .map_err(|e| EngineError::Internal(format!("probe encode failed: {e}")))?;
    sink.send(probe)
        .await
        .map_err(|e| EngineError::Handshake(format!("probe send failed: {e}")))?;

    let before = Instant::now();
    // Only the arrival time of the first reply matters
    next_frame(stream, timeout, "probe reply").await?;
    let one_way = before.elapsed() / 2;

    let report: RenderReport = next_message(stream, timeout, "render report").await?;
    let network_latency_ms = whole_millis(one_way);
    let render_millis = report.render_millis.max(0);

    prom::record_clock_sync_latency("presenter", one_way);
    debug!(
        target: "attendance.clock_sync",
        network_latency_ms,
        render_millis,
        "Presenter calibrated"
    );

    Ok(PresenterCalibration {
        network_latency_ms,
        render_millis,
        render_latency_estimate_ms: network_latency_ms.saturating_add(render_millis),
    })
}

/// Run the attendee handshake.
///
/// `started` is when the connection was accepted; the time until the hello
/// arrives is the attendee latency.
///
/// # Errors
///
/// Returns `EngineError::Handshake` if the hello does not arrive within
/// `timeout` or does not parse.
pub async fn sync_attendee<R>(
    stream: &mut R,
    clock: &dyn Clock,
    started: Instant,
    timeout: Duration,
) -> Result<AttendeeTiming, EngineError>
where
    R: Stream<Item = String> + Unpin,
{
    let hello: AttendeeHello = next_message(stream, timeout, "client time").await?;
    let latency = started.elapsed();
    let server_now: UnixMillis = clock.now_millis();

    let timing = AttendeeTiming {
        clock_drift_ms: server_now.saturating_sub(hello.client_time),
        latency_ms: whole_millis(latency),
    };

    prom::record_clock_sync_latency("attendee", latency);
    debug!(
        target: "attendance.clock_sync",
        clock_drift_ms = timing.clock_drift_ms,
        latency_ms = timing.latency_ms,
        "Attendee synchronized"
    );

    Ok(timing)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use common::clock::ManualClock;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tokio_util::sync::PollSender;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_presenter_calibration() {
        let (server_tx, mut client_rx) = mpsc::channel::<String>(8);
        let (client_tx, server_rx) = mpsc::channel::<String>(8);
        let mut sink = PollSender::new(server_tx);
        let mut stream = ReceiverStream::new(server_rx);

        let client = tokio::spawn(async move {
            let probe: serde_json::Value =
                serde_json::from_str(&client_rx.recv().await.unwrap()).unwrap();
            assert_eq!(probe["sentinelValue"], 1_234_567_890);
            tokio::time::sleep(Duration::from_millis(40)).await;
            client_tx.send("{}".to_string()).await.unwrap();
            client_tx
                .send(r#"{"type":"RENDER_LATENCY","renderMillis":25}"#.to_string())
                .await
                .unwrap();
        });

        let calibration = calibrate_presenter(&mut sink, &mut stream, TIMEOUT)
            .await
            .unwrap();
        client.await.unwrap();

        assert_eq!(calibration.network_latency_ms, 20);
        assert_eq!(calibration.render_millis, 25);
        assert_eq!(calibration.render_latency_estimate_ms, 45);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presenter_negative_render_clamped() {
        let (server_tx, _client_rx) = mpsc::channel::<String>(8);
        let (client_tx, server_rx) = mpsc::channel::<String>(8);
        client_tx.send("pong".to_string()).await.unwrap();
        client_tx
            .send(r#"{"renderMillis": -5}"#.to_string())
            .await
            .unwrap();

        let calibration = calibrate_presenter(
            &mut PollSender::new(server_tx),
            &mut ReceiverStream::new(server_rx),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(calibration.render_millis, 0);
        assert_eq!(calibration.render_latency_estimate_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presenter_times_out() {
        let (server_tx, _client_rx) = mpsc::channel::<String>(8);
        let (_client_tx, server_rx) = mpsc::channel::<String>(8);

        let result = calibrate_presenter(
            &mut PollSender::new(server_tx),
            &mut ReceiverStream::new(server_rx),
            Duration::from_millis(500),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Handshake(m)) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_presenter_bad_render_report() {
        let (server_tx, _client_rx) = mpsc::channel::<String>(8);
        let (client_tx, server_rx) = mpsc::channel::<String>(8);
        client_tx.send("{}".to_string()).await.unwrap();
        client_tx.send("not json".to_string()).await.unwrap();

        let result = calibrate_presenter(
            &mut PollSender::new(server_tx),
            &mut ReceiverStream::new(server_rx),
            TIMEOUT,
        )
        .await;
        assert!(matches!(result, Err(EngineError::Handshake(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attendee_drift_and_latency() {
        let clock = ManualClock::new(10_000);
        let (client_tx, server_rx) = mpsc::channel::<String>(8);
        let mut stream = ReceiverStream::new(server_rx);
        let started = Instant::now();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            client_tx
                .send(r#"{"clientTime": "9500"}"#.to_string())
                .await
                .unwrap();
        });

        let timing = sync_attendee(&mut stream, &clock, started, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(timing.clock_drift_ms, 500);
        assert_eq!(timing.latency_ms, 30);
    }

    #[tokio::test]
    async fn test_attendee_closed_before_hello() {
        let clock = ManualClock::new(0);
        let (client_tx, server_rx) = mpsc::channel::<String>(1);
        drop(client_tx);

        let result = sync_attendee(
            &mut ReceiverStream::new(server_rx),
            &clock,
            Instant::now(),
            TIMEOUT,
        )
        .await;
        assert!(matches!(result, Err(EngineError::Handshake(m)) if m.contains("closed")));
    }
}
