//! Identifier types shared by the engine and its transport adapters.
//!
//! Session and code identifiers are 32-bit values that must be unpredictable
//! to an outside observer, so both are drawn from the operating system CSPRNG
//! (`ring::rand::SystemRandom`) rather than a general-purpose PRNG.

use crate::error::{CommonError, Result};
use ring::rand::SecureRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type UnixMillis = i64;

/// Draw a uniformly distributed `u32` from a secure random source.
///
/// # Errors
///
/// Returns `CommonError::Randomness` if the random source fails.
pub fn secure_u32(rng: &dyn SecureRandom) -> Result<u32> {
    let mut bytes = [0u8; 4];
    rng.fill(&mut bytes).map_err(|_| CommonError::Randomness)?;
    Ok(u32::from_be_bytes(bytes))
}

/// Identifier of a live attendance session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Create a new unpredictable session ID.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::Randomness` if the random source fails.
    pub fn random(rng: &dyn SecureRandom) -> Result<Self> {
        secure_u32(rng).map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Identifier of one rotating code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeId(pub u32);

impl CodeId {
    /// Create a new unpredictable code ID.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::Randomness` if the random source fails.
    pub fn random(rng: &dyn SecureRandom) -> Result<Self> {
        secure_u32(rng).map(Self)
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
