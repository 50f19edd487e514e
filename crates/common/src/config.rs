//! Common configuration types for the attendance engine crates.

use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default `tracing` filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "attendance_service=debug,tower_http=debug";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Output format for log lines.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ObservabilityConfig {
    /// Load from a variable map (`ATTENDANCE_LOG_FORMAT`, `ATTENDANCE_LOG_FILTER`).
    ///
    /// # Errors
    ///
    /// Returns `CommonError::Configuration` for an unknown log format.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, CommonError> {
        let log_format = match vars.get("ATTENDANCE_LOG_FORMAT").map(String::as_str) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(CommonError::Configuration(format!(
                    "ATTENDANCE_LOG_FORMAT must be 'text' or 'json', got '{other}'"
                )))
            }
        };

        let log_filter = vars
            .get("ATTENDANCE_LOG_FILTER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            log_filter,
            log_format,
        })
    }
}
