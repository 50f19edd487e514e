//! Code minting and the per-presenter rotation task.

use crate::actors::connection::ConnectionActorHandle;
use crate::actors::session::SessionActorHandle;
use crate::errors::EngineError;
use crate::signaling::wire::{OutboundFrame, PROBE_SENTINEL};
use common::types::CodeId;
use ring::rand::SystemRandom;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Draws for a code id before giving up on the random source.
const MAX_MINT_ATTEMPTS: usize = 4;

/// Mints unpredictable code ids from the OS CSPRNG.
#[derive(Debug)]
pub struct CodeMinter {
    rng: SystemRandom,
}

impl Default for CodeMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeMinter {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Draw a code id. The presenter probe sentinel is never returned.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Internal` if the random source fails.
    pub fn mint(&self) -> Result<CodeId, EngineError> {
        for _ in 0..MAX_MINT_ATTEMPTS {
            let id = CodeId::random(&self.rng)?;
            if id.0 != PROBE_SENTINEL {
                return Ok(id);
            }
        }
        Err(EngineError::Internal(
            "random source keeps returning the probe sentinel".to_string(),
        ))
    }
}

/// Drives rotation for one session and pushes each code to the presenter.
pub struct CodeRotator;

impl CodeRotator {
    /// Start rotating. The first code is issued immediately.
    ///
    /// The task ends when `cancel_token` fires, when the session is gone, or
    /// when the presenter connection is closed; in the last two cases it
    /// cancels `cancel_token` so the rest of the presenter scope stops too.
    pub fn spawn(
        session: SessionActorHandle,
        presenter: ConnectionActorHandle,
        period: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let session_id = session.session_id();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut rotations: u64 = 0;

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,

                    _ = ticker.tick() => {
                        let code = match session.rotate_code().await {
                            Ok(code) => code,
                            Err(e) => {
                                warn!(
                                    target: "attendance.rotation",
                                    session_id = %session_id,
                                    error = %e,
                                    "Rotation failed, stopping rotator"
                                );
                                cancel_token.cancel();
                                break;
                            }
                        };
                        rotations += 1;

                        match presenter.try_send(OutboundFrame::Code(code)) {
                            Ok(true) => {}
                            Ok(false) => {
                                // The next tick supersedes this code anyway
                                debug!(
                                    target: "attendance.rotation",
                                    session_id = %session_id,
                                    code_id = %code.id,
                                    frames_dropped = presenter.frames_dropped(),
                                    "Presenter backlogged, code push skipped"
                                );
                            }
                            Err(_) => {
                                debug!(
                                    target: "attendance.rotation",
                                    session_id = %session_id,
                                    "Presenter connection gone, stopping rotator"
                                );
                                cancel_token.cancel();
                                break;
                            }
                        }
                    }
                }
            }

            info!(
                target: "attendance.rotation",
                session_id = %session_id,
                rotations,
                "Rotator stopped"
            );
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actors::{ConnectionActor, SessionActor};
    use crate::config::EngineSettings;
    use crate::model::{SessionState, Student};
    use common::clock::ManualClock;
    use common::types::SessionId;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::PollSender;

    const PERIOD: Duration = Duration::from_millis(200);

    struct Rig {
        session: SessionActorHandle,
        clock: Arc<ManualClock>,
        frames: mpsc::Receiver<String>,
        scope: CancellationToken,
        rotator: JoinHandle<()>,
    }

    fn rig() -> Rig {
        let state = SessionState::new(
            SessionId(9),
            "class-a",
            vec![Student::new("S1", "R1", "Ada")],
            0,
        );
        let clock = Arc::new(ManualClock::new(1_000));
        let (session, _task) = SessionActor::spawn(
            state,
            EngineSettings {
                rotation_period: PERIOD,
                ..EngineSettings::default()
            },
            clock.clone(),
            CancellationToken::new(),
        );

        let scope = session.child_token();
        let (tx, frames) = mpsc::channel(64);
        let (presenter, _connection_task) =
            ConnectionActor::spawn("presenter-1".to_string(), PollSender::new(tx), scope.clone());
        let rotator = CodeRotator::spawn(session.clone(), presenter, PERIOD, scope.clone());

        Rig {
            session,
            clock,
            frames,
            scope,
            rotator,
        }
    }

    async fn next_code(frames: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let text = frames.recv().await.expect("presenter socket closed");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotator_pushes_a_code_every_period() {
        let mut rig = rig();

        // First code goes out immediately
        let first = next_code(&mut rig.frames).await;
        assert_eq!(first["createdAt"], 1_000);
        assert_eq!(first["expiredAt"], 1_200);

        rig.clock.set(1_200);
        let second = next_code(&mut rig.frames).await;
        assert_eq!(second["createdAt"], 1_200);
        assert_ne!(first["id"], second["id"]);

        let view = rig.session.get_snapshot().await.unwrap();
        assert_eq!(view.past_codes.len(), 1);
        assert_eq!(view.past_codes[0].expired_at, 1_200);
        assert_eq!(u64::from(view.past_codes[0].id.0), first["id"].as_u64().unwrap());

        rig.scope.cancel();
        rig.rotator.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotator_stops_when_session_ends() {
        let mut rig = rig();
        next_code(&mut rig.frames).await;

        rig.session.cancel();
        rig.rotator.await.unwrap();
        assert!(rig.scope.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotator_stops_when_presenter_is_gone() {
        let mut rig = rig();
        next_code(&mut rig.frames).await;

        // Socket closed: the next write fails and the scope is cancelled
        drop(rig.frames);
        rig.rotator.await.unwrap();
        assert!(rig.scope.is_cancelled());
        assert!(!rig.session.is_cancelled());
    }

    #[test]
    fn test_minter_never_returns_sentinel() {
        let minter = CodeMinter::new();
        let ids: HashSet<CodeId> = (0..256).map(|_| minter.mint().unwrap()).collect();
        assert!(!ids.contains(&CodeId(PROBE_SENTINEL)));
        assert!(ids.len() > 250);
    }
}
