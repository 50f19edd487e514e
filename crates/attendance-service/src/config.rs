//! Attendance service configuration.
//!
//! Configuration is loaded from environment variables. Engine tunables are
//! grouped in [`EngineSettings`] so the engine can be built directly in tests.

use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:6969";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default code rotation cadence in milliseconds.
pub const DEFAULT_ROTATION_PERIOD_MS: u64 = 200;

/// Default symmetric scan acceptance window in milliseconds.
pub const DEFAULT_SCAN_TOLERANCE_MS: i64 = 100;

/// Default per-session notification pipe capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 10;

/// Default maximum number of concurrently active sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// Default clock-sync handshake read timeout in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default interval at which a session retries a dropped snapshot.
pub const DEFAULT_RESYNC_INTERVAL_MS: u64 = 250;

/// Default Origin allowed to open WebSocket connections.
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "attendance";

/// Tunables consumed by the session engine itself.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Time between code rotations.
    pub rotation_period: Duration,

    /// Maximum `|adjusted scan time - code expiry|` accepted, in milliseconds.
    pub scan_tolerance_ms: i64,

    /// Capacity of each session's notification pipe.
    pub event_buffer: usize,

    /// Maximum concurrently active sessions.
    pub max_sessions: usize,

    /// Read timeout for each clock-sync handshake message.
    pub handshake_timeout: Duration,

    /// How often a session retries delivery after a dropped snapshot.
    pub resync_interval: Duration,
}

impl EngineSettings {
    /// Rotation period in whole milliseconds.
    #[must_use]
    pub fn rotation_period_ms(&self) -> i64 {
        i64::try_from(self.rotation_period.as_millis()).unwrap_or(i64::MAX)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rotation_period: Duration::from_millis(DEFAULT_ROTATION_PERIOD_MS),
            scan_tolerance_ms: DEFAULT_SCAN_TOLERANCE_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            max_sessions: DEFAULT_MAX_SESSIONS,
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            resync_interval: Duration::from_millis(DEFAULT_RESYNC_INTERVAL_MS),
        }
    }
}

/// Attendance service configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:6969").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Path of the JSON roster file.
    pub roster_path: String,

    /// Origins allowed to upgrade to a WebSocket.
    pub allowed_origins: Vec<String>,

    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Engine tunables.
    pub engine: EngineSettings,

    /// Log filter and format.
    pub observability: ObservabilityConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("roster_path", &self.roster_path)
            .field("allowed_origins", &self.allowed_origins)
            .field("instance_id", &self.instance_id)
            .field("engine", &self.engine)
            .field("log_format", &self.observability.log_format)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<common::error::CommonError> for ConfigError {
    fn from(err: common::error::CommonError) -> Self {
        ConfigError::InvalidValue(err.to_string())
    }
}

/// Parse an optional numeric variable, rejecting values that fail to parse.
fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let roster_path = vars
            .get("ATTENDANCE_ROSTER_PATH")
            .ok_or_else(|| ConfigError::MissingEnvVar("ATTENDANCE_ROSTER_PATH".to_string()))?
            .clone();

        let bind_address = vars
            .get("ATTENDANCE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("ATTENDANCE_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let rotation_period_ms = parse_var(
            vars,
            "ATTENDANCE_ROTATION_PERIOD_MS",
            DEFAULT_ROTATION_PERIOD_MS,
        )?;
        if rotation_period_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ATTENDANCE_ROTATION_PERIOD_MS must be greater than zero".to_string(),
            ));
        }

        let scan_tolerance_ms = parse_var(
            vars,
            "ATTENDANCE_SCAN_TOLERANCE_MS",
            DEFAULT_SCAN_TOLERANCE_MS,
        )?;
        if scan_tolerance_ms < 0 {
            return Err(ConfigError::InvalidValue(
                "ATTENDANCE_SCAN_TOLERANCE_MS must not be negative".to_string(),
            ));
        }

        // mpsc::channel panics on a zero capacity
        let event_buffer = parse_var(vars, "ATTENDANCE_EVENT_BUFFER", DEFAULT_EVENT_BUFFER)?;
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "ATTENDANCE_EVENT_BUFFER must be greater than zero".to_string(),
            ));
        }

        let max_sessions = parse_var(vars, "ATTENDANCE_MAX_SESSIONS", DEFAULT_MAX_SESSIONS)?;

        let handshake_timeout_ms = parse_var(
            vars,
            "ATTENDANCE_HANDSHAKE_TIMEOUT_MS",
            DEFAULT_HANDSHAKE_TIMEOUT_MS,
        )?;

        let allowed_origins: Vec<String> = vars
            .get("ATTENDANCE_ALLOWED_ORIGINS")
            .map_or(DEFAULT_ALLOWED_ORIGINS, String::as_str)
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(ToString::to_string)
            .collect();

        let instance_id = vars.get("ATTENDANCE_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        let observability = ObservabilityConfig::from_vars(vars)?;

        Ok(Config {
            bind_address,
            health_bind_address,
            roster_path,
            allowed_origins,
            instance_id,
            engine: EngineSettings {
                rotation_period: Duration::from_millis(rotation_period_ms),
                scan_tolerance_ms,
                event_buffer,
                max_sessions,
                handshake_timeout: Duration::from_millis(handshake_timeout_ms),
                resync_interval: Duration::from_millis(DEFAULT_RESYNC_INTERVAL_MS),
            },
            observability,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::config::LogFormat;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "ATTENDANCE_ROSTER_PATH".to_string(),
            "/etc/attendance/roster.json".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.roster_path, "/etc/attendance/roster.json");
        assert_eq!(config.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.engine.rotation_period, Duration::from_millis(200));
        assert_eq!(config.engine.rotation_period_ms(), 200);
        assert_eq!(config.engine.scan_tolerance_ms, 100);
        assert_eq!(config.engine.event_buffer, 10);
        assert_eq!(config.engine.max_sessions, 1000);
        assert_eq!(config.engine.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.observability.log_format, LogFormat::Text);
        // Instance ID should be auto-generated
        assert!(config.instance_id.starts_with("attendance-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "ATTENDANCE_BIND_ADDRESS".to_string(),
            "127.0.0.1:7000".to_string(),
        );
        vars.insert(
            "ATTENDANCE_HEALTH_BIND_ADDRESS".to_string(),
            "127.0.0.1:8082".to_string(),
        );
        vars.insert("ATTENDANCE_ROTATION_PERIOD_MS".to_string(), "500".to_string());
        vars.insert("ATTENDANCE_SCAN_TOLERANCE_MS".to_string(), "250".to_string());
        vars.insert("ATTENDANCE_EVENT_BUFFER".to_string(), "32".to_string());
        vars.insert("ATTENDANCE_MAX_SESSIONS".to_string(), "5".to_string());
        vars.insert(
            "ATTENDANCE_ALLOWED_ORIGINS".to_string(),
            "https://a.example, https://b.example,".to_string(),
        );
        vars.insert("ATTENDANCE_INSTANCE_ID".to_string(), "att-001".to_string());
        vars.insert("ATTENDANCE_LOG_FORMAT".to_string(), "json".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:7000");
        assert_eq!(config.health_bind_address, "127.0.0.1:8082");
        assert_eq!(config.engine.rotation_period_ms(), 500);
        assert_eq!(config.engine.scan_tolerance_ms, 250);
        assert_eq!(config.engine.event_buffer, 32);
        assert_eq!(config.engine.max_sessions, 5);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.instance_id, "att-001");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_from_vars_missing_roster_path() {
        let result = Config::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ATTENDANCE_ROSTER_PATH")
        );
    }

    #[test]
    fn test_zero_rotation_period_rejected() {
        let mut vars = base_vars();
        vars.insert("ATTENDANCE_ROTATION_PERIOD_MS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let mut vars = base_vars();
        vars.insert("ATTENDANCE_EVENT_BUFFER".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_unparseable_number_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "ATTENDANCE_SCAN_TOLERANCE_MS".to_string(),
            "fast".to_string(),
        );
        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(v)) if v == "ATTENDANCE_SCAN_TOLERANCE_MS=fast")
        );
    }

    #[test]
    fn test_bad_log_format_rejected() {
        let mut vars = base_vars();
        vars.insert("ATTENDANCE_LOG_FORMAT".to_string(), "xml".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }
}
