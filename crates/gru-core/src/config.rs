use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::serde_go;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Session timing knobs. Durations are Go-style strings in TOML
/// (`test_duration = "60m"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(with = "serde_go")]
    pub demo_duration: Duration,
    #[serde(with = "serde_go")]
    pub test_duration: Duration,
    #[serde(with = "serde_go")]
    pub tick_interval: Duration,
    #[serde(with = "serde_go")]
    pub probe_interval: Duration,
    /// A success older than this no longer counts as Healthy.
    #[serde(with = "serde_go")]
    pub ping_timeout: Duration,
    /// Consecutive failed probes before the session escalates to the Error
    /// page.
    pub max_consecutive_failures: u32,
    #[serde(with = "serde_go")]
    pub handshake_timeout: Duration,
    /// How long the Final page stays up before exit.
    #[serde(with = "serde_go")]
    pub final_display: Duration,
    /// How long the Error page stays up before exit.
    #[serde(with = "serde_go")]
    pub error_display: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            demo_duration: Duration::from_secs(2 * 60),
            test_duration: Duration::from_secs(60 * 60),
            tick_interval: Duration::from_secs(1),
            probe_interval: Duration::from_secs(3),
            ping_timeout: Duration::from_secs(10),
            max_consecutive_failures: 20,
            handshake_timeout: Duration::from_secs(10),
            final_display: Duration::from_secs(5),
            error_display: Duration::from_secs(15),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("tick_interval", self.tick_interval),
            ("probe_interval", self.probe_interval),
            ("ping_timeout", self.ping_timeout),
            ("test_duration", self.test_duration),
        ];
        for (field, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid {
                field: "max_consecutive_failures",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SessionConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
test_duration = "30m"
max_consecutive_failures = 5
"#,
        )
        .unwrap();
        assert_eq!(config.test_duration, Duration::from_secs(30 * 60));
        assert_eq!(config.max_consecutive_failures, 5);
        assert_eq!(config.probe_interval, Duration::from_secs(3));
    }

    #[test]
    fn malformed_duration_is_a_parse_error() {
        let err = SessionConfig::from_toml_str(r#"ping_timeout = "ten seconds""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = SessionConfig::from_toml_str(r#"tick_interval = "0s""#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "tick_interval",
                ..
            }
        ));
    }

    #[test]
    fn serializes_as_go_durations() {
        let text = toml::to_string(&SessionConfig::default()).unwrap();
        assert!(text.contains(r#"test_duration = "1h0m0s""#));
        assert_eq!(SessionConfig::from_toml_str(&text).unwrap(), SessionConfig::default());
    }
}
