//! File-then-environment configuration loading.
//!
//! Load order: defaults, then an optional TOML file, then environment
//! variables of the form `CONDUIT_<GROUP>__<FIELD>` (double underscore is
//! the nesting separator, matching the group/field naming in the
//! authoritative option table). Environment variables always win.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::AppConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize merged config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub struct ConfigLoader;

const ENV_PREFIX: &str = "CONDUIT_";

impl ConfigLoader {
    /// Loads `conduit.toml` from the current directory if present, applies
    /// `CONDUIT_*` environment overrides, and returns the merged config.
    /// Absence of the file is not an error — defaults apply.
    pub fn load() -> Result<AppConfig, ConfigError> {
        Self::load_from(Path::new("conduit.toml"))
    }

    pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
        let mut value = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str::<toml::Value>(&raw)?
        } else {
            debug!(path = %path.display(), "no config file found, using defaults");
            toml::Value::try_from(AppConfig::default())?
        };

        apply_env_overrides(&mut value);

        let config: AppConfig = value.try_into()?;
        Ok(config)
    }
}

fn apply_env_overrides(root: &mut toml::Value) {
    let table = match root.as_table_mut() {
        Some(t) => t,
        None => return,
    };

    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest
            .split("__")
            .map(|segment| segment.to_lowercase())
            .collect();
        if path.len() < 2 {
            warn!(key = %key, "ignoring malformed env override, expected GROUP__FIELD");
            continue;
        }
        set_nested(table, &path, parse_scalar(&raw));
    }
}

fn set_nested(table: &mut toml::map::Map<String, toml::Value>, path: &[String], value: toml::Value) {
    if path.len() == 1 {
        table.insert(path[0].clone(), value);
        return;
    }
    let entry = table
        .entry(path[0].clone())
        .or_insert_with(|| toml::Value::Table(Default::default()));
    if let toml::Value::Table(nested) = entry {
        set_nested(nested, &path[1..], value);
    }
}

fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ConfigLoader::load_from(Path::new("/nonexistent/conduit.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn file_values_are_applied() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[circuit]\nfailure_threshold = 9\n").unwrap();
        let config = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(config.circuit.failure_threshold, 9);
    }

    #[test]
    fn env_override_beats_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[circuit]\nfailure_threshold = 9\n").unwrap();
        std::env::set_var("CONDUIT_CIRCUIT__FAILURE_THRESHOLD", "3");
        let config = ConfigLoader::load_from(file.path()).unwrap();
        std::env::remove_var("CONDUIT_CIRCUIT__FAILURE_THRESHOLD");
        assert_eq!(config.circuit.failure_threshold, 3);
    }
}
