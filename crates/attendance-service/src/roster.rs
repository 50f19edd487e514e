//! Roster sources.
//!
//! The engine asks a [`RosterProvider`] for a classroom's students once, at
//! session creation. The bundled [`StaticRosterProvider`] serves rosters held
//! in memory, loaded from a JSON file of the form:
//!
//! ```json
//! { "classrooms": { "CS-A": [ { "id": "S101", "secondaryId": "R101", "name": "Ada" } ] } }
//! ```

use crate::model::Student;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors from a roster source.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Unknown classroom: {0}")]
    UnknownClassroom(String),

    #[error("Roster source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid roster data: {0}")]
    Invalid(String),
}

/// Supplies the enrolled students of a classroom, in roster order.
#[async_trait]
pub trait RosterProvider: Send + Sync {
    /// Fetch the students of `classroom_id`.
    async fn get_students(&self, classroom_id: &str) -> Result<Vec<Student>, RosterError>;
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    classrooms: HashMap<String, Vec<Student>>,
}

/// In-memory roster keyed by classroom id.
#[derive(Debug, Clone, Default)]
pub struct StaticRosterProvider {
    classrooms: HashMap<String, Vec<Student>>,
}

impl StaticRosterProvider {
    pub fn new(classrooms: HashMap<String, Vec<Student>>) -> Self {
        Self { classrooms }
    }

    /// Parse the JSON roster format.
    ///
    /// # Errors
    ///
    /// Returns `RosterError::Invalid` if the document does not match the format.
    pub fn from_json_str(json: &str) -> Result<Self, RosterError> {
        let file: RosterFile =
            serde_json::from_str(json).map_err(|e| RosterError::Invalid(e.to_string()))?;
        Ok(Self::new(file.classrooms))
    }

    /// Load a JSON roster file.
    ///
    /// # Errors
    ///
    /// Returns `RosterError::Unavailable` if the file cannot be read and
    /// `RosterError::Invalid` if it cannot be parsed.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RosterError::Unavailable(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&contents)
    }

    pub fn classroom_count(&self) -> usize {
        self.classrooms.len()
    }
}

#[async_trait]
impl RosterProvider for StaticRosterProvider {
    async fn get_students(&self, classroom_id: &str) -> Result<Vec<Student>, RosterError> {
        self.classrooms
            .get(classroom_id)
            .cloned()
            .ok_or_else(|| RosterError::UnknownClassroom(classroom_id.to_string()))
    }
}
