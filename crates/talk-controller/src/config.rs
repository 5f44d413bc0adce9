//! Talk controller configuration.
//!
//! Configuration is loaded from environment variables. Policy constants
//! (join grace period, session duration, points) live in [`SessionPolicy`]
//! so the coordinator can be built without touching the environment.

use common::config::{ObservabilityConfig, DEFAULT_LOG_FILTER};
use common::types::LanguageCode;
use std::collections::{BTreeSet, HashMap};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address (API, health, metrics).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default join grace period in seconds.
pub const DEFAULT_JOIN_GRACE_PERIOD_SECONDS: u64 = 30;

/// Default talk duration in seconds (the 5 minutes).
pub const DEFAULT_SESSION_DURATION_SECONDS: u64 = 300;

/// Default minimum active time for a session to count as completed.
pub const DEFAULT_MIN_COMPLETED_DURATION_SECONDS: u64 = 60;

/// Default points consumed per session attempt.
pub const DEFAULT_POINTS_PER_SESSION: u32 = 1;

/// Default points granted on registration.
pub const DEFAULT_INITIAL_POINTS: u32 = 5;

/// Default points credited to a teacher per completed session.
pub const DEFAULT_TEACHER_REWARD_POINTS: u32 = 1;

/// Languages offered on the dashboard (Japanese, English, Spanish, French).
pub const DEFAULT_SUPPORTED_LANGUAGES: &str = "ja,en,es,fr";

/// Default time allowed for the HTTP server to drain on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

/// Default service instance ID prefix.
pub const DEFAULT_SERVICE_ID_PREFIX: &str = "talk";

/// Session lifecycle and points policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Window after creation in which both participants must join.
    pub join_grace_period: Duration,
    /// Fixed talk duration measured from activation.
    pub session_duration: Duration,
    /// Minimum active time for an early leave to count as completed.
    pub min_completed_duration: Duration,
    /// Points debited from the student per match.
    pub points_per_session: u32,
    /// Points granted on registration.
    pub initial_points: u32,
    /// Points credited to the teacher per completed session (0 disables).
    pub teacher_reward_points: u32,
    /// Refund the student even when the teacher failed to join.
    pub refund_on_teacher_no_show: bool,
    /// Languages users may register with.
    pub supported_languages: BTreeSet<LanguageCode>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            join_grace_period: Duration::from_secs(DEFAULT_JOIN_GRACE_PERIOD_SECONDS),
            session_duration: Duration::from_secs(DEFAULT_SESSION_DURATION_SECONDS),
            min_completed_duration: Duration::from_secs(DEFAULT_MIN_COMPLETED_DURATION_SECONDS),
            points_per_session: DEFAULT_POINTS_PER_SESSION,
            initial_points: DEFAULT_INITIAL_POINTS,
            teacher_reward_points: DEFAULT_TEACHER_REWARD_POINTS,
            refund_on_teacher_no_show: false,
            supported_languages: parse_languages(DEFAULT_SUPPORTED_LANGUAGES).unwrap_or_default(),
        }
    }
}

impl SessionPolicy {
    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a duration or the session cost
    /// is zero, the minimum completed duration exceeds the session duration,
    /// or no language is supported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.join_grace_period.is_zero() {
            return Err(ConfigError::InvalidValue(
                "join grace period must be greater than zero".to_string(),
            ));
        }
        if self.session_duration.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session duration must be greater than zero".to_string(),
            ));
        }
        if self.min_completed_duration > self.session_duration {
            return Err(ConfigError::InvalidValue(
                "minimum completed duration cannot exceed session duration".to_string(),
            ));
        }
        if self.points_per_session == 0 {
            return Err(ConfigError::InvalidValue(
                "points per session must be greater than zero".to_string(),
            ));
        }
        if self.supported_languages.is_empty() {
            return Err(ConfigError::InvalidValue(
                "at least one supported language is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Talk controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this instance.
    pub service_id: String,

    /// Session lifecycle and points policy.
    pub policy: SessionPolicy,

    /// Logging setup.
    pub observability: ObservabilityConfig,

    /// Time allowed for the HTTP server to drain on shutdown.
    pub shutdown_grace: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("TALK_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let join_grace_period = Duration::from_secs(parse_or(
            vars,
            "TALK_JOIN_GRACE_PERIOD_SECONDS",
            DEFAULT_JOIN_GRACE_PERIOD_SECONDS,
        )?);

        let session_duration = Duration::from_secs(parse_or(
            vars,
            "TALK_SESSION_DURATION_SECONDS",
            DEFAULT_SESSION_DURATION_SECONDS,
        )?);

        let min_completed_duration = Duration::from_secs(parse_or(
            vars,
            "TALK_MIN_COMPLETED_DURATION_SECONDS",
            DEFAULT_MIN_COMPLETED_DURATION_SECONDS,
        )?);

        let points_per_session = parse_or(
            vars,
            "TALK_POINTS_PER_SESSION",
            DEFAULT_POINTS_PER_SESSION,
        )?;

        let initial_points = parse_or(vars, "TALK_INITIAL_POINTS", DEFAULT_INITIAL_POINTS)?;

        let teacher_reward_points = parse_or(
            vars,
            "TALK_TEACHER_REWARD_POINTS",
            DEFAULT_TEACHER_REWARD_POINTS,
        )?;

        let refund_on_teacher_no_show = parse_or(vars, "TALK_REFUND_ON_TEACHER_NO_SHOW", false)?;

        let supported_languages = parse_languages(
            vars.get("TALK_SUPPORTED_LANGUAGES")
                .map_or(DEFAULT_SUPPORTED_LANGUAGES, String::as_str),
        )?;

        let policy = SessionPolicy {
            join_grace_period,
            session_duration,
            min_completed_duration,
            points_per_session,
            initial_points,
            teacher_reward_points,
            refund_on_teacher_no_show,
            supported_languages,
        };
        policy.validate()?;

        let observability = ObservabilityConfig {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json_logs: parse_or(vars, "TALK_LOG_JSON", false)?,
        };

        let shutdown_grace = Duration::from_secs(parse_or(
            vars,
            "TALK_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?);

        // Generate instance ID
        let service_id = vars.get("TALK_SERVICE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SERVICE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            service_id,
            policy,
            observability,
            shutdown_grace,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

/// Parse a comma-separated list of language codes.
fn parse_languages(raw: &str) -> Result<BTreeSet<LanguageCode>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            LanguageCode::parse(s)
                .map_err(|e| ConfigError::InvalidValue(format!("TALK_SUPPORTED_LANGUAGES: {e}")))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.policy.join_grace_period, Duration::from_secs(30));
        assert_eq!(config.policy.session_duration, Duration::from_secs(300));
        assert_eq!(config.policy.min_completed_duration, Duration::from_secs(60));
        assert_eq!(config.policy.points_per_session, 1);
        assert_eq!(config.policy.initial_points, 5);
        assert_eq!(config.policy.teacher_reward_points, 1);
        assert!(!config.policy.refund_on_teacher_no_show);
        assert_eq!(config.policy.supported_languages.len(), 4);
        assert!(!config.observability.json_logs);
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
        // Service ID should be auto-generated
        assert!(config.service_id.starts_with("talk-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let vars = HashMap::from([
            ("TALK_BIND_ADDRESS".to_string(), "127.0.0.1:9090".to_string()),
            ("TALK_SERVICE_ID".to_string(), "talk-custom-001".to_string()),
            (
                "TALK_JOIN_GRACE_PERIOD_SECONDS".to_string(),
                "45".to_string(),
            ),
            ("TALK_SESSION_DURATION_SECONDS".to_string(), "600".to_string()),
            (
                "TALK_MIN_COMPLETED_DURATION_SECONDS".to_string(),
                "120".to_string(),
            ),
            ("TALK_POINTS_PER_SESSION".to_string(), "2".to_string()),
            ("TALK_INITIAL_POINTS".to_string(), "10".to_string()),
            ("TALK_TEACHER_REWARD_POINTS".to_string(), "0".to_string()),
            (
                "TALK_REFUND_ON_TEACHER_NO_SHOW".to_string(),
                "true".to_string(),
            ),
            ("TALK_SUPPORTED_LANGUAGES".to_string(), "en, DE ,ko".to_string()),
            ("TALK_LOG_JSON".to_string(), "true".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9090");
        assert_eq!(config.service_id, "talk-custom-001");
        assert_eq!(config.policy.join_grace_period, Duration::from_secs(45));
        assert_eq!(config.policy.session_duration, Duration::from_secs(600));
        assert_eq!(config.policy.min_completed_duration, Duration::from_secs(120));
        assert_eq!(config.policy.points_per_session, 2);
        assert_eq!(config.policy.initial_points, 10);
        assert_eq!(config.policy.teacher_reward_points, 0);
        assert!(config.policy.refund_on_teacher_no_show);
        let languages: Vec<&str> = config
            .policy
            .supported_languages
            .iter()
            .map(LanguageCode::as_str)
            .collect();
        assert_eq!(languages, vec!["de", "en", "ko"]);
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_from_vars_rejects_malformed_number() {
        let vars = HashMap::from([(
            "TALK_SESSION_DURATION_SECONDS".to_string(),
            "five minutes".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(v)) if v.contains("TALK_SESSION_DURATION_SECONDS"))
        );
    }

    #[test]
    fn test_from_vars_rejects_min_duration_above_session_duration() {
        let vars = HashMap::from([
            ("TALK_SESSION_DURATION_SECONDS".to_string(), "30".to_string()),
            (
                "TALK_MIN_COMPLETED_DURATION_SECONDS".to_string(),
                "60".to_string(),
            ),
        ]);

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_rejects_zero_grace_period() {
        let vars = HashMap::from([(
            "TALK_JOIN_GRACE_PERIOD_SECONDS".to_string(),
            "0".to_string(),
        )]);

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_rejects_free_sessions() {
        let vars = HashMap::from([("TALK_POINTS_PER_SESSION".to_string(), "0".to_string())]);

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(v)) if v.contains("points per session")
        ));
    }

    #[test]
    fn test_from_vars_rejects_bad_language() {
        let vars = HashMap::from([(
            "TALK_SUPPORTED_LANGUAGES".to_string(),
            "en,klingon".to_string(),
        )]);

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(v)) if v.contains("klingon")
        ));
    }

    #[test]
    fn test_default_policy_is_valid() {
        assert!(SessionPolicy::default().validate().is_ok());
    }
}
