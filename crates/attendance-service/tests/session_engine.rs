//! End-to-end tests of the session engine through the registry handle.
//!
//! The wall clock is a `ManualClock`, so rotation instants and code expiries
//! are exact. Attendee timing is supplied directly instead of through a
//! handshake.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use attendance_service::actors::{ActorMetrics, SessionRegistryHandle};
use attendance_service::attendance::AttendanceSnapshot;
use attendance_service::clock_sync::AttendeeTiming;
use attendance_service::config::EngineSettings;
use attendance_service::errors::EngineError;
use attendance_service::roster::RosterProvider;
use attendance_service::validation::{MatchedCode, ScanRejection};
use attendance_test_utils::{student_ids, test_settings, MockRosterProvider, ScanBuilder, TestRoster};
use common::clock::{Clock, ManualClock};
use tokio::sync::mpsc;

const CLASSROOM: &str = "CS-A";

struct Engine {
    registry: SessionRegistryHandle,
    clock: Arc<ManualClock>,
    roster: MockRosterProvider,
    metrics: Arc<ActorMetrics>,
}

fn engine_with(roster: TestRoster, settings: EngineSettings) -> Engine {
    let clock = Arc::new(ManualClock::new(1_000));
    let roster = MockRosterProvider::new().with_classroom(CLASSROOM, roster.students());
    let metrics = ActorMetrics::new();
    let provider: Arc<dyn RosterProvider> = Arc::new(roster.clone());
    let shared_clock: Arc<dyn Clock> = clock.clone();
    let registry =
        SessionRegistryHandle::new(provider, settings, Arc::clone(&metrics), shared_clock);
    Engine {
        registry,
        clock,
        roster,
        metrics,
    }
}

fn engine() -> Engine {
    engine_with(
        TestRoster::new()
            .with_student("S101")
            .with_student("S102")
            .with_student("S103"),
        test_settings(),
    )
}

async fn next_snapshot(rx: &mut mpsc::Receiver<AttendanceSnapshot>) -> AttendanceSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a snapshot")
        .expect("notification pipe closed")
}

// ============================================================================
// Rotation and validation
// ============================================================================

#[tokio::test]
async fn test_scan_window_across_rotations() {
    let engine = engine();
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    let session = created.handle;
    let mut updates = session.subscribe().await.unwrap();

    let initial = next_snapshot(&mut updates).await;
    assert_eq!(student_ids(&initial.absentees), ["S101", "S102", "S103"]);
    assert!(initial.presentees.is_empty());

    // Code A: created 1000, expires 1200
    let code_a = session.rotate_code().await.unwrap();
    assert_eq!((code_a.created_at, code_a.expired_at), (1_000, 1_200));

    // Adjusted scan time 1250: delta 50 is inside the window
    let accepted = engine
        .registry
        .submit_scan(
            ScanBuilder::new(created.session_id, code_a.id)
                .student("S101")
                .at(1_250)
                .build(),
            AttendeeTiming::default(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.delta_ms, 50);
    assert_eq!(accepted.matched, MatchedCode::Current);

    let after_scan = next_snapshot(&mut updates).await;
    assert_eq!(student_ids(&after_scan.absentees), ["S102", "S103"]);
    assert_eq!(student_ids(&after_scan.presentees), ["S101"]);

    // Code B at 1200 archives A with its expiry unchanged
    engine.clock.set(1_200);
    let code_b = session.rotate_code().await.unwrap();
    assert_eq!((code_b.created_at, code_b.expired_at), (1_200, 1_400));
    assert_ne!(code_b.id, code_a.id);

    let view = engine.registry.get_snapshot(created.session_id).await.unwrap();
    assert_eq!(view.past_codes.len(), 1);
    assert_eq!(view.past_codes[0].id, code_a.id);
    assert_eq!(view.past_codes[0].expired_at, 1_200);
    assert_eq!(view.current_code, Some(code_b));

    // Adjusted 1310 against A's expiry: delta 110 is outside the window
    let result = engine
        .registry
        .submit_scan(
            ScanBuilder::new(created.session_id, code_a.id)
                .student("S102")
                .at(1_310)
                .build(),
            AttendeeTiming::default(),
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::CodeExpiredOrUnknown(ScanRejection::CodeExpired {
            delta_ms: 110
        }))
    ));

    // The archived code still accepts a scan that lands inside its window
    let late = engine
        .registry
        .submit_scan(
            ScanBuilder::new(created.session_id, code_a.id)
                .student("S103")
                .at(1_150)
                .build(),
            AttendeeTiming::default(),
        )
        .await
        .unwrap();
    assert_eq!(late.matched, MatchedCode::Past { age: 0 });
    assert_eq!(late.delta_ms, -50);
}

#[tokio::test]
async fn test_timing_corrections_shift_the_window() {
    let engine = engine();
    let created = engine.registry.create_session(CLASSROOM, 30).await.unwrap();
    let code = created.handle.rotate_code().await.unwrap();

    // Client clock runs 5000ms behind and its frames take 20ms to arrive;
    // the presenter takes 30ms to show a code
    let timing = AttendeeTiming {
        clock_drift_ms: 5_000,
        latency_ms: 20,
    };
    let scanned_at = code.expired_at - 5_000 + 20 + 30;

    let accepted = engine
        .registry
        .submit_scan(
            ScanBuilder::new(created.session_id, code.id)
                .student("S102")
                .at(scanned_at)
                .build(),
            timing,
        )
        .await
        .unwrap();
    assert_eq!(accepted.adjusted_scan_time, code.expired_at);
    assert_eq!(accepted.delta_ms, 0);
}

#[tokio::test]
async fn test_unknown_code_and_session_are_rejected() {
    let engine = engine();
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    let code = created.handle.rotate_code().await.unwrap();

    let unknown_code = engine
        .registry
        .submit_scan(
            ScanBuilder::new(created.session_id, common::types::CodeId(code.id.0 ^ 1))
                .student("S101")
                .at(code.expired_at)
                .build(),
            AttendeeTiming::default(),
        )
        .await;
    assert!(matches!(
        unknown_code,
        Err(EngineError::CodeExpiredOrUnknown(ScanRejection::UnknownCode))
    ));

    let wrong_session = common::types::SessionId(created.session_id.0 ^ 1);
    let unknown_session = engine
        .registry
        .submit_scan(
            ScanBuilder::new(wrong_session, code.id)
                .student("S101")
                .at(code.expired_at)
                .build(),
            AttendeeTiming::default(),
        )
        .await;
    assert!(matches!(unknown_session, Err(EngineError::SessionNotFound(id)) if id == wrong_session));

    let outsider = engine
        .registry
        .submit_scan(
            ScanBuilder::new(created.session_id, code.id)
                .student("S999")
                .at(code.expired_at)
                .build(),
            AttendeeTiming::default(),
        )
        .await;
    assert!(matches!(outsider, Err(EngineError::StudentNotFound(id)) if id == "S999"));
}

// ============================================================================
// Presence mutation
// ============================================================================

#[tokio::test]
async fn test_second_scan_is_idempotent() {
    let engine = engine();
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    let session = created.handle;
    let mut updates = session.subscribe().await.unwrap();
    next_snapshot(&mut updates).await;

    let code = session.rotate_code().await.unwrap();
    let scan = ScanBuilder::new(created.session_id, code.id)
        .student("S101")
        .at(code.expired_at);

    engine
        .registry
        .submit_scan(scan.clone().build(), AttendeeTiming::default())
        .await
        .unwrap();
    next_snapshot(&mut updates).await;

    let again = engine
        .registry
        .submit_scan(scan.build(), AttendeeTiming::default())
        .await;
    assert!(matches!(again, Err(EngineError::AlreadyPresent)));

    // A round trip through the actor orders after the rejected scan
    let attendance = engine
        .registry
        .get_attendance_list(created.session_id)
        .await
        .unwrap();
    assert_eq!(attendance.present_count(), 1);
    assert!(updates.try_recv().is_err(), "no snapshot for an unchanged roster");

    // Marking directly is also a no-op
    assert!(!engine
        .registry
        .mark_present(created.session_id, "S101")
        .await
        .unwrap());
    engine
        .registry
        .get_attendance_list(created.session_id)
        .await
        .unwrap();
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn test_toggle_always_notifies() {
    let engine = engine();
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    let mut updates = engine.registry.subscribe(created.session_id).await.unwrap();
    next_snapshot(&mut updates).await;

    assert!(engine
        .registry
        .toggle_attendance(created.session_id, "S103")
        .await
        .unwrap());
    let snapshot = next_snapshot(&mut updates).await;
    assert_eq!(student_ids(&snapshot.presentees), ["S103"]);

    assert!(!engine
        .registry
        .toggle_attendance(created.session_id, "S103")
        .await
        .unwrap());
    let snapshot = next_snapshot(&mut updates).await;
    assert!(snapshot.presentees.is_empty());
    assert_eq!(snapshot.absentees.len(), 3);

    let missing = engine
        .registry
        .toggle_attendance(created.session_id, "S404")
        .await;
    assert!(matches!(missing, Err(EngineError::StudentNotFound(_))));
}

#[tokio::test]
async fn test_concurrent_scans_all_land() {
    const K: usize = 40;
    let settings = EngineSettings {
        event_buffer: 2,
        resync_interval: Duration::from_millis(20),
        ..test_settings()
    };
    let engine = engine_with(TestRoster::numbered("S", K), settings);
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    let session_id = created.session_id;
    let mut updates = created.handle.subscribe().await.unwrap();
    let code = created.handle.rotate_code().await.unwrap();

    // Nobody reads the pipe while the scans run, so most snapshots drop
    let scans: Vec<_> = (1..=K)
        .map(|n| {
            let registry = engine.registry.clone();
            let attempt = ScanBuilder::new(session_id, code.id)
                .student(format!("S{n}"))
                .at(code.expired_at)
                .build();
            tokio::spawn(async move {
                registry
                    .submit_scan(attempt, AttendeeTiming::default())
                    .await
            })
        })
        .collect();

    for scan in scans {
        scan.await.unwrap().unwrap();
    }

    let attendance = engine.registry.get_attendance_list(session_id).await.unwrap();
    assert_eq!(attendance.present_count(), K);
    assert!(attendance.absentees.is_empty());

    // The final state still arrives
    let final_state = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = updates.recv().await.expect("pipe closed");
            if snapshot.present_count() == K {
                return snapshot;
            }
        }
    })
    .await
    .expect("final state was never delivered");

    let expected: Vec<String> = (1..=K).map(|n| format!("S{n}")).collect();
    assert_eq!(student_ids(&final_state.presentees), expected);
}

#[tokio::test]
async fn test_mutations_do_not_wait_for_a_stalled_subscriber() {
    let settings = EngineSettings {
        event_buffer: 1,
        ..test_settings()
    };
    let engine = engine_with(TestRoster::numbered("S", 10), settings);
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    // Subscribed but never read: the pipe is full from the initial snapshot on
    let _updates = created.handle.subscribe().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        for n in 1..=10 {
            assert!(engine
                .registry
                .mark_present(created.session_id, &format!("S{n}"))
                .await
                .unwrap());
        }
    })
    .await
    .expect("marking blocked on a full notification pipe");

    let attendance = engine
        .registry
        .get_attendance_list(created.session_id)
        .await
        .unwrap();
    assert_eq!(attendance.present_count(), 10);
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_create_and_delete_sessions() {
    let engine = engine();

    let first = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    let second = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(engine.roster.call_count(), 2);
    assert_eq!(engine.metrics.session_count(), 2);

    // Sessions from the same classroom do not share presence
    engine
        .registry
        .mark_present(first.session_id, "S101")
        .await
        .unwrap();
    let other = engine
        .registry
        .get_attendance_list(second.session_id)
        .await
        .unwrap();
    assert_eq!(other.present_count(), 0);

    engine.registry.delete_session(first.session_id).await.unwrap();
    let gone = engine.registry.get_snapshot(first.session_id).await;
    assert!(matches!(gone, Err(EngineError::SessionNotFound(_))));

    // Deleting again is a no-op
    engine.registry.delete_session(first.session_id).await.unwrap();

    let status = engine.registry.get_status().await.unwrap();
    assert_eq!(status.session_count, 1);
    assert!(!status.is_draining);

    // The survivor is untouched
    let view = engine.registry.get_snapshot(second.session_id).await.unwrap();
    assert_eq!(view.classroom_id, CLASSROOM);
}

#[tokio::test]
async fn test_deleting_a_session_closes_its_pipe() {
    let engine = engine();
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();
    let mut updates = created.handle.subscribe().await.unwrap();
    next_snapshot(&mut updates).await;

    engine.registry.delete_session(created.session_id).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .expect("pipe stayed open after delete");
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_roster_failures_surface() {
    let engine = engine();

    let unknown = engine.registry.create_session("NOPE", 0).await;
    assert!(matches!(unknown, Err(EngineError::RosterRetrievalFailed(_))));

    engine.roster.set_unavailable(true);
    let offline = engine.registry.create_session(CLASSROOM, 0).await;
    assert!(matches!(offline, Err(EngineError::RosterRetrievalFailed(_))));
    assert_eq!(engine.roster.call_count(), 2);

    engine.roster.set_unavailable(false);
    assert!(engine.registry.create_session(CLASSROOM, 0).await.is_ok());
}

#[tokio::test]
async fn test_shutdown_refuses_new_sessions() {
    let engine = engine();
    let created = engine.registry.create_session(CLASSROOM, 0).await.unwrap();

    engine
        .registry
        .shutdown(Duration::from_secs(2))
        .await
        .unwrap();

    assert!(created.handle.is_cancelled());
    let refused = engine.registry.create_session(CLASSROOM, 0).await;
    assert!(matches!(refused, Err(EngineError::Draining)));
}
