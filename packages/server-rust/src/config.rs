//! Container configuration: pool sizing, access/close timeouts, callback threads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a [`crate::StatelessContainer`].
///
/// Every field has a default, so a JSON config file only needs to name the
/// options it overrides. Durations accept integer milliseconds or strings
/// such as `"100ms"`, `"30 seconds"` or `"1 minute and 30 seconds"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ContainerConfig {
    /// Maximum time a caller waits for a pooled instance before failing.
    #[serde(with = "duration_format")]
    pub access_timeout: Duration,
    /// Maximum time `undeploy`/`shutdown` wait for borrowed instances and
    /// in-flight calls to finish.
    #[serde(with = "duration_format")]
    pub close_timeout: Duration,
    /// Worker threads running pre-destroy callbacks for evicted and drained instances.
    pub callback_threads: usize,
    /// Installs the statistics interceptor first in every chain.
    pub stats_enabled: bool,
    /// Default pool sizing; a deployment may override it.
    pub pool: PoolConfig,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            access_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(300),
            callback_threads: 5,
            stats_enabled: false,
            pool: PoolConfig::default(),
        }
    }
}

/// Per-deployment instance pool sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PoolConfig {
    /// Instances created when the deployment starts and kept through idle sweeps.
    pub min_size: usize,
    /// Upper bound on borrowed instances (strict) or idle instances (non-strict).
    pub max_size: usize,
    /// Block callers at `max_size` instead of creating extra instances.
    pub strict_pooling: bool,
    /// Idle instances older than this are evicted down to `min_size`.
    /// Zero disables eviction.
    #[serde(with = "duration_format")]
    pub idle_timeout: Duration,
    /// How often the background sweeper looks for expired idle instances.
    #[serde(with = "duration_format")]
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            strict_pooling: true,
            idle_timeout: Duration::ZERO,
            sweep_interval: Duration::from_secs(300),
        }
    }
}

/// Errors from reading or validating configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("property {key}: invalid duration {value:?}")]
    InvalidDuration { key: String, value: String },
    #[error("property {key}: invalid number {value:?}")]
    InvalidNumber { key: String, value: String },
    #[error("property {key}: invalid boolean {value:?}")]
    InvalidBool { key: String, value: String },
    #[error("pool max_size must be at least 1")]
    ZeroMaxSize,
    #[error("pool min_size ({min}) exceeds max_size ({max})")]
    MinExceedsMax { min: usize, max: usize },
}

impl ContainerConfig {
    /// Builds a configuration from descriptor-style properties.
    ///
    /// Recognized keys (case-insensitive): `AccessTimeout`, `CloseTimeout`,
    /// `CallbackThreads`, `StatsEnabled`, `MinSize`, `MaxSize`,
    /// `StrictPooling`, `IdleTimeout`, `SweepInterval`. Unknown keys are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for malformed values or inconsistent pool sizing.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key.to_ascii_lowercase().as_str() {
                "accesstimeout" => config.access_timeout = duration_property(key, value)?,
                "closetimeout" => config.close_timeout = duration_property(key, value)?,
                "callbackthreads" => config.callback_threads = number_property(key, value)?,
                "statsenabled" => config.stats_enabled = bool_property(key, value)?,
                "minsize" => config.pool.min_size = number_property(key, value)?,
                "maxsize" => config.pool.max_size = number_property(key, value)?,
                "strictpooling" => config.pool.strict_pooling = bool_property(key, value)?,
                "idletimeout" => config.pool.idle_timeout = duration_property(key, value)?,
                "sweepinterval" => config.pool.sweep_interval = duration_property(key, value)?,
                _ => tracing::warn!(key, "ignoring unknown container property"),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks pool sizing invariants.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ZeroMaxSize` or `ConfigError::MinExceedsMax`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()
    }
}

impl PoolConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::ZeroMaxSize` or `ConfigError::MinExceedsMax`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::MinExceedsMax {
                min: self.min_size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

fn duration_property(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn number_property(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn bool_property(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Parses durations like `250`, `100ms`, `30 seconds`, `1 minute and 30 seconds`.
///
/// A bare number is milliseconds. Parts separated by `and` or `,` are summed.
#[must_use]
pub fn parse_duration(text: &str) -> Option<Duration> {
    let normalized = text.replace(',', " and ");
    let mut total = Duration::ZERO;
    let mut parts = 0;
    for part in normalized.split(" and ") {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        total = total.checked_add(parse_duration_part(part)?)?;
        parts += 1;
    }
    (parts > 0).then_some(total)
}

fn parse_duration_part(part: &str) -> Option<Duration> {
    let split = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    let (number, unit) = part.split_at(split);
    let amount: u64 = number.parse().ok()?;
    let millis_per_unit: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" | "millis" | "millisecond" | "milliseconds" => 1,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000,
        "h" | "hr" | "hour" | "hours" => 3_600_000,
        "d" | "day" | "days" => 86_400_000,
        _ => return None,
    };
    amount.checked_mul(millis_per_unit).map(Duration::from_millis)
}

/// Serde adapter: serialize as integer milliseconds, deserialize from either
/// integer milliseconds or a duration string.
mod duration_format {
    use std::time::Duration;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        #[allow(clippy::cast_possible_truncation)]
        let millis = value.as_millis() as u64;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => super::parse_duration(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid duration {text:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_config_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.access_timeout, Duration::from_secs(30));
        assert_eq!(config.close_timeout, Duration::from_secs(300));
        assert_eq!(config.callback_threads, 5);
        assert!(!config.stats_enabled);
        assert_eq!(config.pool.max_size, 10);
        assert!(config.pool.strict_pooling);
        assert_eq!(config.pool.idle_timeout, Duration::ZERO);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("30 seconds"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1 minute"), Some(Duration::from_secs(60)));
        assert_eq!(
            parse_duration("1 minute and 30 seconds"),
            Some(Duration::from_secs(90))
        );
        assert_eq!(parse_duration("1h, 2m"), Some(Duration::from_secs(3720)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5 fortnights"), None);
        assert_eq!(parse_duration("-5s"), None);
    }

    #[test]
    fn from_properties_recognizes_original_names() {
        let config = ContainerConfig::from_properties([
            ("AccessTimeout", "100ms"),
            ("CloseTimeout", "2 seconds"),
            ("CallbackThreads", "2"),
            ("MaxSize", "1"),
            ("StrictPooling", "true"),
            ("IdleTimeout", "1 minute"),
            ("Bogus", "ignored"),
        ])
        .unwrap();
        assert_eq!(config.access_timeout, Duration::from_millis(100));
        assert_eq!(config.close_timeout, Duration::from_secs(2));
        assert_eq!(config.callback_threads, 2);
        assert_eq!(config.pool.max_size, 1);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn from_properties_reports_bad_values() {
        let err = ContainerConfig::from_properties([("AccessTimeout", "later")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidDuration {
                key: "AccessTimeout".to_string(),
                value: "later".to_string()
            }
        );

        let err = ContainerConfig::from_properties([("MinSize", "5"), ("MaxSize", "2")])
            .unwrap_err();
        assert_eq!(err, ConfigError::MinExceedsMax { min: 5, max: 2 });
    }

    #[test]
    fn deserializes_json_with_mixed_duration_forms() {
        let json = r#"{
            "access_timeout": 100,
            "close_timeout": "5 seconds",
            "pool": { "max_size": 3, "idle_timeout": "1 minute" }
        }"#;
        let config: ContainerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.access_timeout, Duration::from_millis(100));
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.pool.max_size, 3);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(60));
        assert!(config.pool.strict_pooling);
        assert_eq!(config.callback_threads, 5);
    }
}
