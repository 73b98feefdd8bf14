//! Configuration traits and utilities.
//!
//! Bridges load their settings once at startup: an optional JSON5 file,
//! then environment overrides, then validation. The result is immutable
//! for the rest of the process lifetime.

use std::path::Path;
use std::str::FromStr;

use serde::de::DeserializeOwned;

use crate::LoggingConfig;
use crate::error::{BridgeError, Result};

/// Source of environment values. Production passes [`process_env`]; tests
/// pass a closure over a fixed map.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a variable from the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Look up `name` and parse it, treating an empty value as unset.
pub fn parse_env<T>(env: EnvLookup<'_>, name: &'static str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(name) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| BridgeError::InvalidEnv {
                env: name,
                message: e.to_string(),
            }),
        _ => Ok(None),
    }
}

/// Trait for bridge configuration types.
///
/// Implement this trait for your bridge's configuration struct to get
/// layered loading (file, then environment) and validation.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use serialink_bridge_framework::{BridgeConfig, EnvLookup, LoggingConfig, parse_env};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyBridgeConfig {
///     pub logging: LoggingConfig,
///     pub port: String,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn apply_env(&mut self, env: EnvLookup<'_>) -> Result<()> {
///         if let Some(port) = parse_env(env, "MY_PORT")? {
///             self.port = port;
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait BridgeConfig: Sized + DeserializeOwned + Default {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Overlay values from the environment onto the loaded configuration.
    fn apply_env(&mut self, _env: EnvLookup<'_>) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config = read_file::<Self>(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, overlay the environment, then validate.
    fn load_layered(path: Option<&Path>, env: EnvLookup<'_>) -> Result<Self> {
        let mut config = match path {
            Some(path) => read_file::<Self>(path)?,
            None => Self::default(),
        };

        config.apply_env(env)?;
        config.validate()?;

        Ok(config)
    }
}

fn read_file<C: DeserializeOwned>(path: &Path) -> Result<C> {
    if !path.exists() {
        return Err(BridgeError::ConfigNotFound {
            path: path.display().to_string(),
        });
    }

    let content = std::fs::read_to_string(path)?;
    Ok(serialink_common::parse_config(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        port: String,
        #[serde(default)]
        baud: u32,
    }

    impl BridgeConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn validate(&self) -> Result<()> {
            if self.port.is_empty() {
                return Err(BridgeError::MissingSetting {
                    setting: "port",
                    env: "TEST_PORT",
                });
            }
            Ok(())
        }

        fn apply_env(&mut self, env: EnvLookup<'_>) -> Result<()> {
            if let Some(port) = parse_env(env, "TEST_PORT")? {
                self.port = port;
            }
            if let Some(baud) = parse_env(env, "TEST_BAUD")? {
                self.baud = baud;
            }
            Ok(())
        }
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(BridgeError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_unparsable_file_is_parse_error() {
        let path = std::env::temp_dir().join(format!("serialink-bad-{}.json5", std::process::id()));
        std::fs::write(&path, "{ port: ").unwrap();

        let result = TestConfig::load(&path);
        std::fs::remove_file(&path).unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, BridgeError::ConfigParse(_)));
        assert!(err.is_config());
    }

    #[test]
    fn test_layered_env_only() {
        let env = env_of(&[("TEST_PORT", "/dev/ttyACM0"), ("TEST_BAUD", "9600")]);
        let config = TestConfig::load_layered(None, &env).unwrap();

        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.baud, 9600);
    }

    #[test]
    fn test_layered_missing_required() {
        let env = env_of(&[]);
        let err = TestConfig::load_layered(None, &env).unwrap_err();
        assert!(matches!(err, BridgeError::MissingSetting { setting: "port", .. }));
        assert!(err.is_config());
    }

    #[test]
    fn test_invalid_env_value() {
        let env = env_of(&[("TEST_PORT", "/dev/ttyACM0"), ("TEST_BAUD", "fast")]);
        let err = TestConfig::load_layered(None, &env).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidEnv { env: "TEST_BAUD", .. }));
    }

    #[test]
    fn test_empty_env_value_is_unset() {
        let env = env_of(&[("TEST_PORT", "/dev/ttyACM0"), ("TEST_BAUD", "  ")]);
        let config = TestConfig::load_layered(None, &env).unwrap();
        assert_eq!(config.baud, 0);
    }
}
