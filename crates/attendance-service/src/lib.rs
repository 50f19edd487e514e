//! Attendance Service Library
//!
//! Rotating-code attendance sessions: a presenter displays a code that
//! changes every rotation period, attendees scan it, and the engine decides
//! from the scan time (corrected for clock drift and latency) whether the
//! scan proves presence.
//!
//! # Architecture
//!
//! ```text
//! SessionRegistryActor (singleton per instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per live session)
//!
//! presenter socket ── ConnectionActor ◄── CodeRotator
//!                                     ◄── snapshot forwarder
//!                                     ◄── toggle replies
//! attendee socket  ── scan loop ──► registry ──► SessionActor
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per session**: no lock shared between sessions
//! - **CSPRNG ids**: session and code ids come from `ring::rand::SystemRandom`
//! - **Symmetric tolerance**: a scan is accepted iff `|adjusted - expired_at| <= tolerance`
//! - **Non-blocking notifications**: bounded per-session pipe, newest dropped when full,
//!   current state republished once the pipe drains
//! - **In-memory only**: sessions end with the presenter connection
//!
//! # Modules
//!
//! - [`actors`] - Registry, session and connection actors
//! - [`attendance`] - Presence mutation and sorted snapshots
//! - [`clock_sync`] - Presenter and attendee timing handshakes
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`events`] - Per-session notification pipe
//! - [`http`] - WebSocket routes
//! - [`model`] - Session state, codes and students
//! - [`observability`] - Metrics and health endpoints
//! - [`roster`] - Roster sources
//! - [`rotation`] - Code minting and the rotation task
//! - [`signaling`] - Presenter and attendee connection flows
//! - [`validation`] - Scan acceptance rules

pub mod actors;
pub mod attendance;
pub mod clock_sync;
pub mod config;
pub mod errors;
pub mod events;
pub mod http;
pub mod model;
pub mod observability;
pub mod roster;
pub mod rotation;
pub mod signaling;
pub mod validation;
