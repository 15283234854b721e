//! Environment variable helpers shared by the configuration structs.

use std::str::FromStr;
use std::time::Duration;

/// A configuration value was missing or could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Read `key`, falling back to `default` when unset.
pub fn env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Read a required `key`.
pub fn env_required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { key })
}

/// Read a duration expressed in whole seconds.
pub fn env_secs(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}

/// Read a duration expressed in milliseconds.
pub fn env_millis(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_or(key, default.as_millis() as u64).map(Duration::from_millis)
}

/// Parse a raw value, attributing failures to `key`.
pub fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_trims_whitespace() {
        let n: u32 = parse_value("MAX_CONCURRENCY", " 8 ").unwrap();
        assert_eq!(n, 8);
    }

    #[test]
    fn parse_value_reports_key() {
        let err = parse_value::<u32>("MAX_CONCURRENCY", "eight").unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENCY"));
        assert!(err.to_string().contains("eight"));
    }

    #[test]
    fn unset_key_uses_default() {
        let v = env_or("HEADSHOT_TEST_SURELY_UNSET_KEY", 17u64).unwrap();
        assert_eq!(v, 17);
        let d = env_secs("HEADSHOT_TEST_SURELY_UNSET_KEY", Duration::from_secs(5)).unwrap();
        assert_eq!(d, Duration::from_secs(5));
    }

    #[test]
    fn required_key_missing() {
        assert!(matches!(
            env_required("HEADSHOT_TEST_SURELY_UNSET_KEY"),
            Err(ConfigError::Missing { .. })
        ));
    }
}
