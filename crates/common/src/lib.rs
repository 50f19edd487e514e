//! Common utilities and types shared across the attendance engine crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for strongly-typed identifiers
pub mod types;

/// Module for shared configuration types
pub mod config;

/// Module for wall-clock sources (millisecond resolution)
pub mod clock;
