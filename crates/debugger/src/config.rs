//! Session configuration.
//!
//! ```toml
//! mode = "non-stop"
//! reset-frame-on-deselect = false
//! request-timeout-secs = 10
//! ```

use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// How the backend schedules threads. Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// One stop or resume applies to every thread.
    #[default]
    AllStop,
    /// Each thread stops and resumes on its own.
    NonStop,
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-stop" => Ok(Self::AllStop),
            "non-stop" => Ok(Self::NonStop),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SessionConfig {
    pub mode: ExecutionMode,
    /// Whether selecting a thread sends every other thread back to its top
    /// frame. When false each thread keeps its own remembered frame.
    pub reset_frame_on_deselect: bool,
    pub request_timeout_secs: u64,
    /// Expand every expandable root once when a frame's variables load.
    pub expand_roots_on_load: bool,
    /// Number of console lines kept.
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::AllStop,
            reset_frame_on_deselect: true,
            request_timeout_secs: 30,
            expand_roots_on_load: true,
            log_capacity: 1000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid execution mode {0:?}, expected all-stop or non-stop")]
    InvalidMode(String),
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `<config dir>/godbg/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("godbg").join("config.toml"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), ?config, "loaded session config");
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => {
                tracing::debug!("no config file, using defaults");
                Ok(Self::default())
            }
        }
    }
}
