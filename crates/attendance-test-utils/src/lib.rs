//! # Attendance Test Utilities
//!
//! Shared test utilities for the attendance service.
//!
//! ## Modules
//!
//! - `fixtures` - Rosters, engine settings and scan builders
//! - `mock_roster` - Roster source with call counting and failure injection
//! - `mock_socket` - In-memory text socket standing in for a WebSocket
//!
//! ## Usage
//!
//! ```rust,ignore
//! use attendance_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let roster = MockRosterProvider::new()
//!         .with_classroom("CS-A", TestRoster::numbered("S", 3).students());
//!
//!     let (server, mut client) = MockSocket::pair();
//!     // hand `server.sink` / `server.stream` to a connection flow,
//!     // then drive it through `client`
//! }
//! ```

pub mod fixtures;
pub mod mock_roster;
pub mod mock_socket;

pub use fixtures::*;
pub use mock_roster::*;
pub use mock_socket::*;
