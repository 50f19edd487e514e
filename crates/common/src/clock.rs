//! Wall-clock sources with millisecond resolution.
//!
//! Code expiry instants and client clock drift are compared against the
//! server's wall clock, so the engine reads time through the [`Clock`] trait.
//! Production uses [`SystemClock`]; tests drive a `ManualClock` (behind the
//! `test-utils` feature) to make rotation instants exact.

use crate::types::UnixMillis;
use std::fmt::Debug;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> UnixMillis;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> UnixMillis {
        chrono::Utc::now().timestamp_millis()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "test-utils"))]
mod manual {
    use super::{Clock, UnixMillis};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// A clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        /// Create a clock reading `start` milliseconds.
        #[must_use]
        pub fn new(start: UnixMillis) -> Self {
            Self {
                now: AtomicI64::new(start),
            }
        }

        /// Jump to an absolute instant.
        pub fn set(&self, now: UnixMillis) {
            self.now.store(now, Ordering::SeqCst);
        }

        /// Move forward by `millis`.
        pub fn advance(&self, millis: i64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> UnixMillis {
            self.now.load(Ordering::SeqCst)
        }
    }
}
