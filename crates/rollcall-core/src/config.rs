//! Application configuration from an optional `rollcall.toml`.
//!
//! Every field has a default, so running without a file is normal.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid config {path}: {source}")]
    Parse { path: String, source: toml::de::Error },
    #[error("invalid config {path}: {reason}")]
    Invalid { path: String, reason: String },
}

/// Application configuration, loaded from an optional TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the persisted face store.
    pub store_path: PathBuf,
    /// SeetaFace detection model file.
    pub detector_model: PathBuf,
    /// Matches with a distance at or above this are reported as unknown.
    pub match_threshold: f64,
    /// Where the rendered preview image is written.
    pub preview_path: PathBuf,
    pub preview_width: u32,
    pub preview_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("known_faces.bin"),
            detector_model: PathBuf::from("models/seeta_fd_frontal_v1.0.bin"),
            match_threshold: 100.0,
            preview_path: PathBuf::from("preview.png"),
            preview_width: 600,
            preview_height: 400,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `rollcall.toml` in the
    /// working directory is used if present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    tracing::debug!("no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: shown.clone(), source })?;
        let config = Self::parse(&text, &shown)?;
        tracing::info!(path = %shown, "loaded config");
        Ok(config)
    }

    fn parse(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)
            .map_err(|source| ConfigError::Parse { path: origin.to_string(), source })?;
        config.validate(origin)?;
        Ok(config)
    }

    fn validate(&self, origin: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            path: origin.to_string(),
            reason: reason.to_string(),
        };
        if !self.match_threshold.is_finite() || self.match_threshold <= 0.0 {
            return Err(invalid("match_threshold must be a positive number"));
        }
        if self.preview_width == 0 || self.preview_height == 0 {
            return Err(invalid("preview dimensions must be non-zero"));
        }
        Ok(())
    }
}
