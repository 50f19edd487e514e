//! Actor model implementation for the attendance engine.
//!
//! ```text
//! SessionRegistryActor (singleton per instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per live session)
//!         ├── owns roster, current code and code history
//!         └── owns the session's notification pipe
//!
//! ConnectionActor (one per presenter socket, owned by the presenter scope)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per session**: mutations of one session never wait on another
//! - **Validate-and-mark is one message**: nothing interleaves between the
//!   decision on a scan and its effect on the roster
//! - **CancellationToken propagation**: the registry hands each session a child token
//! - **Mailbox monitoring**: depth thresholds with metrics (Session: 100/500, Connection: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `SessionRegistryActor` singleton that supervises sessions
//! - [`session`] - `SessionActor` per live session
//! - [`connection`] - `ConnectionActor` per presenter socket
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{SessionRegistryActor, SessionRegistryHandle};
pub use session::{SessionActor, SessionActorHandle};
