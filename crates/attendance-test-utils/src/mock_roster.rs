//! Mock roster source.
//!
//! Serves classrooms from memory, counts lookups, and can be switched into
//! an "unavailable" mode to exercise roster failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use attendance_test_utils::MockRosterProvider;
//!
//! let roster = MockRosterProvider::new().with_classroom("CS-A", students);
//! roster.set_unavailable(true);
//! assert!(roster.get_students("CS-A").await.is_err());
//! assert_eq!(roster.call_count(), 1);
//! ```

use async_trait::async_trait;
use attendance_service::model::Student;
use attendance_service::roster::{RosterError, RosterProvider};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory roster source with failure injection.
#[derive(Debug, Clone, Default)]
pub struct MockRosterProvider {
    classrooms: Arc<Mutex<HashMap<String, Vec<Student>>>>,
    calls: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockRosterProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a classroom.
    #[must_use]
    pub fn with_classroom(self, classroom_id: &str, students: Vec<Student>) -> Self {
        self.classrooms
            .lock()
            .unwrap()
            .insert(classroom_id.to_string(), students);
        self
    }

    /// Delay every lookup, e.g. to hold a slow roster fetch open.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Fail every lookup with `RosterError::Unavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of lookups served so far, failed ones included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RosterProvider for MockRosterProvider {
    async fn get_students(&self, classroom_id: &str) -> Result<Vec<Student>, RosterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RosterError::Unavailable("mock roster offline".to_string()));
        }

        self.classrooms
            .lock()
            .unwrap()
            .get(classroom_id)
            .cloned()
            .ok_or_else(|| RosterError::UnknownClassroom(classroom_id.to_string()))
    }
}
