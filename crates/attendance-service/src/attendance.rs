//! Presence mutation and attendance snapshots.

use crate::errors::EngineError;
use crate::model::{SessionState, Student};
use serde::Serialize;
use std::cmp::Ordering;

/// Absentees and presentees, each sorted by student id suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceSnapshot {
    pub absentees: Vec<Student>,
    pub presentees: Vec<Student>,
}

impl AttendanceSnapshot {
    /// Partition and sort a roster.
    pub fn from_roster(roster: &[Student]) -> Self {
        let (mut presentees, mut absentees): (Vec<Student>, Vec<Student>) =
            roster.iter().cloned().partition(|student| student.is_present);
        absentees.sort_by(|a, b| compare_ids(&a.id, &b.id));
        presentees.sort_by(|a, b| compare_ids(&a.id, &b.id));
        Self {
            absentees,
            presentees,
        }
    }

    pub fn present_count(&self) -> usize {
        self.presentees.len()
    }
}

/// Trailing run of ASCII digits in a student id, as a number.
///
/// Runs too long for a `u64` saturate.
pub fn numeric_suffix(id: &str) -> Option<u64> {
    let prefix_len = id.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let digits = id.get(prefix_len..).filter(|d| !d.is_empty())?;
    Some(digits.parse().unwrap_or(u64::MAX))
}

/// Ids order by numeric suffix; ids without one sort last. Ties fall back
/// to the full id.
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (numeric_suffix(a), numeric_suffix(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Mark a student present after an accepted scan.
///
/// Returns `true` if presence changed; a student already present is left
/// untouched and no notification should follow.
///
/// # Errors
///
/// Returns `EngineError::StudentNotFound` if the id is not on the roster.
pub fn mark_present(state: &mut SessionState, student_id: &str) -> Result<bool, EngineError> {
    let student = state
        .student_mut(student_id)
        .ok_or_else(|| EngineError::StudentNotFound(student_id.to_string()))?;
    if student.is_present {
        return Ok(false);
    }
    student.is_present = true;
    Ok(true)
}

/// Flip a student's presence unconditionally. Returns the new presence.
///
/// # Errors
///
/// Returns `EngineError::StudentNotFound` if the id is not on the roster.
pub fn toggle(state: &mut SessionState, student_id: &str) -> Result<bool, EngineError> {
    let student = state
        .student_mut(student_id)
        .ok_or_else(|| EngineError::StudentNotFound(student_id.to_string()))?;
    student.is_present = !student.is_present;
    Ok(student.is_present)
}
