// src/core/config.rs

//! # Engine Configuration
//!
//! `parley.toml` holds the knobs the engine reads at construction time. Every
//! field is optional; missing fields take their default.
//!
//! ```toml
//! ambiguity_policy = "prefer-best"
//! case_sensitive = false
//! token_separator = " "
//! quote_chars = ['"', "'"]
//! tokenizer = "quoted"
//! workers = 4
//! ```

use crate::{
    constants::{
        CONFIG_DIR_NAME, CONFIG_ENV_VAR, CONFIG_FILENAME, DEFAULT_QUOTE_CHARS,
        DEFAULT_TOKEN_SEPARATOR, DEFAULT_WORKER_COUNT,
    },
    core::tokenizer::{QuotedTokenizer, ShellTokenizer, Tokenizer},
};
use serde::{Deserialize, Serialize};
use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

/// Errors raised while loading, saving or validating an [`EngineConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("Could not read config file '{path}': {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML or has unknown fields.
    #[error("Config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    /// The settings could not be rendered as TOML.
    #[error("Config could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// A value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What the resolver does when two different commands can both execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityPolicy {
    /// Stop and report every command that matched.
    #[default]
    Error,
    /// Keep the highest-ranked command.
    PreferBest,
}

/// Which tokenizer splits the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TokenizerKind {
    /// Separator, quote characters and backslash escapes from this config.
    #[default]
    Quoted,
    /// POSIX shell word splitting. Ignores `token_separator` and `quote_chars`.
    Shell,
}

/// Engine settings, as read from `parley.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// What to do when several candidates tie for first place.
    pub ambiguity_policy: AmbiguityPolicy,
    /// Match command names case-sensitively.
    pub case_sensitive: bool,
    /// Splits tokens. A whitespace separator splits on any whitespace.
    pub token_separator: char,
    /// Characters that open and close a quoted token.
    pub quote_chars: Vec<char>,
    /// Which tokenizer to build.
    pub tokenizer: TokenizerKind,
    /// Background workers started by the binary.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ambiguity_policy: AmbiguityPolicy::default(),
            case_sensitive: false,
            token_separator: DEFAULT_TOKEN_SEPARATOR,
            quote_chars: DEFAULT_QUOTE_CHARS.to_vec(),
            tokenizer: TokenizerKind::default(),
            workers: DEFAULT_WORKER_COUNT,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the config file at `path`.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Loading engine config from '{}'", path.display());
        Self::from_toml_str(&content)
    }

    /// Loads the file named by `PARLEY_CONFIG`, else `<config dir>/parley/parley.toml`
    /// if it exists, else the defaults.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match config_path_from(env::var_os(CONFIG_ENV_VAR), default_config_path()) {
            Some(path) => Self::load_from_path(&path),
            None => {
                log::debug!("No engine config found, using defaults.");
                Ok(Self::default())
            }
        }
    }

    /// Serializes the settings as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Writes the config as TOML, creating parent directories as needed.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(path, self.to_toml_string()?).map_err(io_error)
    }

    /// Rejects settings the tokenizer or the queue cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.quote_chars.contains(&self.token_separator) {
            return Err(ConfigError::Invalid(format!(
                "the token separator {:?} is also a quote character",
                self.token_separator
            )));
        }
        if self.quote_chars.contains(&crate::constants::ESCAPE_CHAR)
            || self.token_separator == crate::constants::ESCAPE_CHAR
        {
            return Err(ConfigError::Invalid(
                "the escape character cannot be a separator or quote".to_string(),
            ));
        }
        Ok(())
    }

    /// The tokenizer selected by `tokenizer`, configured from these settings.
    pub fn build_tokenizer(&self) -> Arc<dyn Tokenizer> {
        match self.tokenizer {
            TokenizerKind::Quoted => Arc::new(QuotedTokenizer::new(
                self.token_separator,
                self.quote_chars.clone(),
            )),
            TokenizerKind::Shell => Arc::new(ShellTokenizer),
        }
    }
}

/// `<config dir>/parley/parley.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILENAME))
}

fn config_path_from(env_value: Option<OsString>, fallback: Option<PathBuf>) -> Option<PathBuf> {
    match env_value {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => fallback.filter(|path| path.is_file()),
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.ambiguity_policy, AmbiguityPolicy::Error);
    }

    #[test]
    fn test_partial_file_overrides_fields() {
        let config = EngineConfig::from_toml_str(
            "ambiguity_policy = \"prefer-best\"\ncase_sensitive = true\nworkers = 2\n",
        )
        .unwrap();
        assert_eq!(config.ambiguity_policy, AmbiguityPolicy::PreferBest);
        assert!(config.case_sensitive);
        assert_eq!(config.workers, 2);
        assert_eq!(config.token_separator, ' ');
    }

    #[test]
    fn test_rejects_unknown_fields_and_bad_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("colour = true"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("workers = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("token_separator = \"'\""),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);
        let config = EngineConfig {
            tokenizer: TokenizerKind::Shell,
            token_separator: ',',
            ..EngineConfig::default()
        };
        config.save_to_path(&path).unwrap();
        assert_eq!(EngineConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let result = EngineConfig::load_from_path(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_config_path_precedence() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join(CONFIG_FILENAME);
        fs::write(&existing, "").unwrap();
        let missing = dir.path().join("missing.toml");

        let from_env = config_path_from(Some(OsString::from("/tmp/explicit.toml")), Some(existing.clone()));
        assert_eq!(from_env, Some(PathBuf::from("/tmp/explicit.toml")));
        assert_eq!(config_path_from(None, Some(existing.clone())), Some(existing));
        assert_eq!(config_path_from(Some(OsString::new()), Some(missing)), None);
    }

    #[test]
    fn test_build_tokenizer_follows_kind() {
        let quoted = EngineConfig {
            token_separator: ',',
            ..EngineConfig::default()
        };
        assert_eq!(quoted.build_tokenizer().split("a,b").unwrap(), vec!["a", "b"]);

        let shell = EngineConfig {
            tokenizer: TokenizerKind::Shell,
            ..EngineConfig::default()
        };
        assert_eq!(shell.build_tokenizer().split("a 'b c'").unwrap(), vec!["a", "b c"]);
    }
}
