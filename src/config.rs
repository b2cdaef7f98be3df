//! Engine configuration, loadable from YAML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// What `/` does when both operands are integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DivisionPolicy {
    /// Always a float.
    #[default]
    True,
    /// Floor division, like `//`.
    Floor,
    /// An int when there is no remainder, a float otherwise.
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Roots tried in order when resolving `import a.b`.
    pub search_paths: Vec<String>,
    pub division: DivisionPolicy,
    /// Time-slice length; `None` never suspends for time.
    pub yield_interval_ms: Option<u64>,
    pub recursion_limit: usize,
    /// Log a disassembly of every compiled module at debug level.
    pub trace_compile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_paths: vec![".".to_string()],
            division: DivisionPolicy::True,
            yield_interval_ms: Some(100),
            recursion_limit: 1000,
            trace_compile: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parsing engine configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("recursion_limit must be at least 1")]
    RecursionLimit,
}

impl EngineConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        if config.recursion_limit == 0 {
            return Err(ConfigError::RecursionLimit);
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// A configuration that never time-slices, for deterministic embedding.
    pub fn without_time_slicing() -> Self {
        Self {
            yield_interval_ms: None,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = EngineConfig::from_yaml("division: exact\n").unwrap();
        assert_eq!(config.division, DivisionPolicy::Exact);
        assert_eq!(config.recursion_limit, 1000);
        assert_eq!(config.yield_interval_ms, Some(100));
        assert_eq!(config.search_paths, ["."]);
    }

    #[test]
    fn null_interval_disables_slicing() {
        let config = EngineConfig::from_yaml(indoc! {"
            search_paths: [lib, vendor]
            yield_interval_ms: null
            recursion_limit: 50
            trace_compile: true
        "})
        .unwrap();
        assert_eq!(config.yield_interval_ms, None);
        assert_eq!(config.search_paths, ["lib", "vendor"]);
        assert!(config.trace_compile);
    }

    #[test]
    fn rejects_unknown_fields_and_zero_limit() {
        assert!(matches!(
            EngineConfig::from_yaml("verbose: true\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            EngineConfig::from_yaml("recursion_limit: 0\n"),
            Err(ConfigError::RecursionLimit)
        ));
    }
}
