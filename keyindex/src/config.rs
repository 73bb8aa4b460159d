//! Configuration for the `keyindex` inspection binary.
//!
//! # Environment Variables
//!
//! - `KEYINDEX_PATH`: Index file to inspect (required)
//! - `KEYINDEX_KEY_SIZE`: Expected key size (default: `0`, accept the stored size)
//! - `KEYINDEX_DUMP_LIMIT`: Maximum number of entries to print (default: `20`)

use std::path::PathBuf;

/// Inspection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectConfig {
    pub path: PathBuf,
    /// Key size the file must have, or 0 to accept any.
    pub key_size: usize,
    pub dump_limit: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl InspectConfig {
    /// Default entry dump limit.
    pub const DEFAULT_DUMP_LIMIT: usize = 20;

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let path = lookup("KEYINDEX_PATH")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("KEYINDEX_PATH".to_string()))?;

        let key_size = parse_usize(&lookup, "KEYINDEX_KEY_SIZE", 0)?;
        let dump_limit = parse_usize(&lookup, "KEYINDEX_DUMP_LIMIT", Self::DEFAULT_DUMP_LIMIT)?;

        Ok(Self {
            path,
            key_size,
            dump_limit,
        })
    }
}

fn parse_usize(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match lookup(name) {
        Some(value) => value.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a non-negative integer"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = InspectConfig::from_lookup(lookup_from(&[("KEYINDEX_PATH", "a.idx")]))
            .expect("load config");
        assert_eq!(config.path, PathBuf::from("a.idx"));
        assert_eq!(config.key_size, 0);
        assert_eq!(config.dump_limit, InspectConfig::DEFAULT_DUMP_LIMIT);
    }

    #[test]
    fn test_all_values() {
        let config = InspectConfig::from_lookup(lookup_from(&[
            ("KEYINDEX_PATH", "/tmp/b.idx"),
            ("KEYINDEX_KEY_SIZE", "16"),
            ("KEYINDEX_DUMP_LIMIT", "5"),
        ]))
        .expect("load config");
        assert_eq!(config.key_size, 16);
        assert_eq!(config.dump_limit, 5);
    }

    #[test]
    fn test_missing_path() {
        let result = InspectConfig::from_lookup(lookup_from(&[("KEYINDEX_PATH", "")]));
        assert_eq!(
            result,
            Err(ConfigError::MissingEnvVar("KEYINDEX_PATH".to_string()))
        );
    }

    #[test]
    fn test_invalid_key_size() {
        let result = InspectConfig::from_lookup(lookup_from(&[
            ("KEYINDEX_PATH", "c.idx"),
            ("KEYINDEX_KEY_SIZE", "-4"),
        ]));
        assert_eq!(
            result,
            Err(ConfigError::InvalidValue {
                name: "KEYINDEX_KEY_SIZE".to_string(),
                message: "'-4' is not a non-negative integer".to_string(),
            })
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert_eq!(
            error.to_string(),
            "missing required environment variable: TEST_VAR"
        );
    }
}
