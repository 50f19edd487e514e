//! Session state owned by a single session actor.
//!
//! [`SessionState`] is never shared: the session actor holds it by value and
//! every read or mutation happens inside that actor's message loop.

use crate::errors::EngineError;
use common::types::{CodeId, SessionId, UnixMillis};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Attempts at drawing a code id not yet issued in this session.
const MAX_CODE_ID_ATTEMPTS: usize = 16;

/// One rotating code and its validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    pub id: CodeId,
    pub created_at: UnixMillis,
    /// Soft deadline while current; the rotation instant once archived.
    pub expired_at: UnixMillis,
}

/// A roster entry with its presence flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub secondary_id: String,
    pub name: String,
    #[serde(default)]
    pub is_present: bool,
}

impl Student {
    /// Create an absent student.
    pub fn new(
        id: impl Into<String>,
        secondary_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            secondary_id: secondary_id.into(),
            name: name.into(),
            is_present: false,
        }
    }
}

/// A scan submitted by an attendee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanAttempt {
    pub session_id: SessionId,
    pub code_id: CodeId,
    /// Client-reported send time, in the client's clock.
    pub scanned_at: UnixMillis,
    pub student_id: String,
}

/// Read-only copy of a session, returned by snapshot requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub id: SessionId,
    pub classroom_id: String,
    pub roster: Vec<Student>,
    pub current_code: Option<Code>,
    pub past_codes: Vec<Code>,
    pub render_latency_ms: i64,
}

/// Authoritative in-memory record of one session.
#[derive(Debug)]
pub struct SessionState {
    id: SessionId,
    classroom_id: String,
    roster: Vec<Student>,
    index: HashMap<String, usize>,
    current_code: Option<Code>,
    past_codes: Vec<Code>,
    issued: HashSet<CodeId>,
    render_latency_ms: i64,
}

impl SessionState {
    /// Seed a session from a roster. Every student starts absent.
    ///
    /// Duplicate student ids keep the first occurrence.
    pub fn new(
        id: SessionId,
        classroom_id: impl Into<String>,
        students: Vec<Student>,
        render_latency_ms: i64,
    ) -> Self {
        let mut roster = Vec::with_capacity(students.len());
        let mut index = HashMap::with_capacity(students.len());
        for mut student in students {
            if index.contains_key(&student.id) {
                continue;
            }
            student.is_present = false;
            index.insert(student.id.clone(), roster.len());
            roster.push(student);
        }

        Self {
            id,
            classroom_id: classroom_id.into(),
            roster,
            index,
            current_code: None,
            past_codes: Vec::new(),
            issued: HashSet::new(),
            render_latency_ms,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn classroom_id(&self) -> &str {
        &self.classroom_id
    }

    pub fn roster(&self) -> &[Student] {
        &self.roster
    }

    pub fn current_code(&self) -> Option<&Code> {
        self.current_code.as_ref()
    }

    /// Archived codes, oldest first.
    pub fn past_codes(&self) -> &[Code] {
        &self.past_codes
    }

    pub fn render_latency_ms(&self) -> i64 {
        self.render_latency_ms
    }

    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.index
            .get(student_id)
            .and_then(|&position| self.roster.get(position))
    }

    pub fn student_mut(&mut self, student_id: &str) -> Option<&mut Student> {
        let position = *self.index.get(student_id)?;
        self.roster.get_mut(position)
    }

    /// Install a fresh code, archiving the current one at `now`.
    ///
    /// `mint` is called until it yields an id never issued in this session.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Internal` if `mint` fails or keeps producing
    /// already-issued ids.
    pub fn rotate<F>(
        &mut self,
        now: UnixMillis,
        period_ms: i64,
        mut mint: F,
    ) -> Result<Code, EngineError>
    where
        F: FnMut() -> Result<CodeId, EngineError>,
    {
        let mut fresh = None;
        for _ in 0..MAX_CODE_ID_ATTEMPTS {
            let candidate = mint()?;
            if !self.issued.contains(&candidate) {
                fresh = Some(candidate);
                break;
            }
        }
        let id = fresh.ok_or_else(|| {
            EngineError::Internal(format!(
                "no unused code id after {MAX_CODE_ID_ATTEMPTS} attempts"
            ))
        })?;

        if let Some(mut previous) = self.current_code.take() {
            // Archived expiries stay non-decreasing even if the wall clock steps back.
            let floor = self.past_codes.last().map_or(now, |last| last.expired_at);
            previous.expired_at = now.max(floor);
            self.past_codes.push(previous);
        }

        let code = Code {
            id,
            created_at: now,
            expired_at: now.saturating_add(period_ms),
        };
        self.issued.insert(id);
        self.current_code = Some(code);
        Ok(code)
    }

    /// Copy the session for an outside observer.
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            classroom_id: self.classroom_id.clone(),
            roster: self.roster.clone(),
            current_code: self.current_code,
            past_codes: self.past_codes.clone(),
            render_latency_ms: self.render_latency_ms,
        }
    }

    /// Install a code directly, bypassing the minter.
    #[cfg(test)]
    pub(crate) fn set_current_code(&mut self, code: Code) {
        self.issued.insert(code.id);
        self.current_code = Some(code);
    }
}
