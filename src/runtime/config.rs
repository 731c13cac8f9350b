use std::{env, sync::OnceLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::error::warning_message;

const DEFAULT_MAX_RELEASE_DEPTH: usize = 64;
const DEFAULT_DELAYED_FREE_CAPACITY: usize = 32;

pub const ENV_MAX_RELEASE_DEPTH: &str = "AETHER_MAX_RELEASE_DEPTH";
pub const ENV_DELAYED_FREE_CAPACITY: &str = "AETHER_DELAYED_FREE_CAPACITY";
pub const ENV_WARN_ON_LEAK: &str = "AETHER_WARN_ON_LEAK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("max_release_depth must be at least 1")]
    ZeroReleaseDepth,
}

/// Tunables for a thread context.
///
/// Reference-count thresholds are not configurable; see `heap::header`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How deep field release may recurse before blocks are parked on the
    /// context's deferred-free list.
    pub max_release_depth: usize,
    /// Initial capacity of the deferred-free list.
    pub delayed_free_capacity: usize,
    /// Warn at context teardown if the thread's heap still holds live bytes.
    pub warn_on_leak: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_release_depth: DEFAULT_MAX_RELEASE_DEPTH,
            delayed_free_capacity: DEFAULT_DELAYED_FREE_CAPACITY,
            warn_on_leak: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads overrides from the `AETHER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars())
    }

    /// Applies `AETHER_*` overrides from an explicit key/value source on top
    /// of the defaults. Unknown keys are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = RuntimeConfig::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            match key.as_ref() {
                ENV_MAX_RELEASE_DEPTH => {
                    config.max_release_depth = parse_usize(ENV_MAX_RELEASE_DEPTH, value)?
                }
                ENV_DELAYED_FREE_CAPACITY => {
                    config.delayed_free_capacity = parse_usize(ENV_DELAYED_FREE_CAPACITY, value)?
                }
                ENV_WARN_ON_LEAK => config.warn_on_leak = parse_bool(ENV_WARN_ON_LEAK, value)?,
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_release_depth == 0 {
            return Err(ConfigError::ZeroReleaseDepth);
        }
        Ok(())
    }

    /// Process-wide configuration used by lazily created thread contexts.
    ///
    /// Loaded from the environment once; an invalid environment falls back
    /// to the defaults with a warning.
    pub fn global() -> &'static RuntimeConfig {
        static GLOBAL: OnceLock<RuntimeConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| match RuntimeConfig::from_env() {
            Ok(config) => config,
            Err(err) => {
                warning_message(format_args!("ignoring runtime environment: {err}"));
                RuntimeConfig::default()
            }
        })
    }
}

fn parse_usize(key: &'static str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_serialize_to_json() {
        let json = serde_json::to_string(&RuntimeConfig::default()).unwrap();
        insta::assert_snapshot!(json, @r#"{"max_release_depth":64,"delayed_free_capacity":32,"warn_on_leak":false}"#);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{"warn_on_leak": true}"#).unwrap();
        assert!(config.warn_on_leak);
        assert_eq!(config.max_release_depth, DEFAULT_MAX_RELEASE_DEPTH);
    }

    #[test]
    fn zero_depth_is_rejected() {
        let err = RuntimeConfig::from_json(r#"{"max_release_depth": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroReleaseDepth));
    }

    #[test]
    fn vars_override_defaults() {
        let config = RuntimeConfig::from_vars([
            (ENV_MAX_RELEASE_DEPTH, "8"),
            (ENV_WARN_ON_LEAK, "on"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();
        assert_eq!(config.max_release_depth, 8);
        assert_eq!(config.delayed_free_capacity, DEFAULT_DELAYED_FREE_CAPACITY);
        assert!(config.warn_on_leak);
    }

    #[test]
    fn bad_var_reports_key() {
        let err = RuntimeConfig::from_vars([(ENV_DELAYED_FREE_CAPACITY, "lots")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for AETHER_DELAYED_FREE_CAPACITY: \"lots\""
        );
    }
}
