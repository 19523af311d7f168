use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use session_store::{default_database_path, state_root};
use thiserror::Error;
use tracing::info;

pub const CONFIG_PATH_ENV_VAR: &str = "NEBULA_CONFIG_PATH";
pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";
pub const SUPPORTED_MODELS: [&str; 2] = ["gpt-4.1-nano", "gpt-4.1-mini"];
pub const DEFAULT_MAX_SESSIONS: usize = 5;
pub const DEFAULT_MAX_ROUNDS: usize = crate::engine::DEFAULT_MAX_ROUNDS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the home directory")]
    MissingHomeDir,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode config: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("database_path must not be empty")]
    EmptyDatabasePath,

    #[error("unsupported model '{model}'. Available models: {}", SUPPORTED_MODELS.join(", "))]
    InvalidModel { model: String },

    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    #[error("Unsupported provider '{provider_id}'. Available providers: {available}")]
    UnknownProvider {
        provider_id: String,
        available: &'static str,
    },
}

/// Persistent user settings, stored as pretty JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub model: String,
    pub database_path: PathBuf,
    /// Number of recent sessions offered at startup.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Provider calls allowed per turn.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

impl Config {
    #[must_use]
    pub fn defaults_for_home(home: &Path) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            database_path: default_database_path(home),
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Loads `path`, writing defaults there first when it does not exist.
    pub fn load_or_create(path: &Path, home: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::defaults_for_home(home);
            config.save(path)?;
            info!(path = %path.display(), "wrote default config");
            return Ok(config);
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut encoded = serde_json::to_string_pretty(self).map_err(ConfigError::Encode)?;
        encoded.push('\n');
        fs::write(path, encoded).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_model(&self.model)?;
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_rounds",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Switches the model and persists the change to `path`.
    pub fn set_model(&mut self, model: &str, path: &Path) -> Result<(), ConfigError> {
        let model = model.trim();
        validate_model(model)?;
        self.model = model.to_string();
        self.save(path)
    }
}

pub fn validate_model(model: &str) -> Result<(), ConfigError> {
    if SUPPORTED_MODELS.contains(&model) {
        Ok(())
    } else {
        Err(ConfigError::InvalidModel {
            model: model.to_string(),
        })
    }
}

pub fn home_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::MissingHomeDir)
}

/// Config location: explicit path, then `NEBULA_CONFIG_PATH`, then `~/.nebula/config.json`.
#[must_use]
pub fn config_path(explicit: Option<&Path>, home: &Path) -> PathBuf {
    resolve_config_path(explicit, std::env::var(CONFIG_PATH_ENV_VAR).ok(), home)
}

fn resolve_config_path(explicit: Option<&Path>, from_env: Option<String>, home: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    from_env
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| state_root(home).join(CONFIG_FILE))
}
