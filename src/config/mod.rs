//! Optional defaults file.
//!
//! `config.toml` in the platform config directory (or the file named by
//! `--config`) may preset the mode, the RTP offset and the capture filter.
//! Command-line flags always take precedence.

use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::decoder::Mode;
use crate::error::ConfigError;

/// Defaults read from the config file
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Decoding mode: `rtp`, `rtcp` or `rtcp-mux`
    pub mode: Option<Mode>,
    /// Byte offset of the RTP header in each frame
    pub rtp_offset: Option<usize>,
    /// Capture filter expression
    pub filter: Option<String>,
}

impl Config {
    /// Get the default config file path
    fn default_path() -> Option<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "rtp-decoder", "rtp-decoder")?;
        Some(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load `explicit`, or the default file if it exists.
    ///
    /// A missing default file yields the empty config; a missing explicit
    /// file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("no config file, using built-in defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ConfigFile {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let config = Self::parse(&content).map_err(|reason| ConfigError::ConfigFile {
            path: path.clone(),
            reason,
        })?;
        tracing::debug!("loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.message().to_string())
    }
}
