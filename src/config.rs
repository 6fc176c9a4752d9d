/// Persisted processing defaults
///
/// Options live as JSON in the user's config directory:
/// - Linux: ~/.config/gallery-optimizer/options.json
/// - macOS: ~/Library/Application Support/gallery-optimizer/options.json
/// - Windows: %APPDATA%\gallery-optimizer\options.json
///
/// A missing file means built-in defaults.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::optimize::ProcessingOptions;

const APP_DIR: &str = "gallery-optimizer";
const OPTIONS_FILE: &str = "options.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid option: {0}")]
    InvalidValue(String),
}

/// Default location of the options file, if the platform has a config dir
pub fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir().or_else(dirs::home_dir)?;
    path.push(APP_DIR);
    path.push(OPTIONS_FILE);
    Some(path)
}

/// Load options from `path`, or from the default location when `None`
///
/// An explicitly given path must exist; the default one may be absent.
pub fn load_options(path: Option<&Path>) -> Result<ProcessingOptions, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(ProcessingOptions::default()),
        },
    };

    if !required && !path.exists() {
        return Ok(ProcessingOptions::default());
    }

    let json = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let options = ProcessingOptions::from_json(&json)
        .map_err(|source| ConfigError::Json { path: path.clone(), source })?;

    tracing::debug!("📁 Loaded options from {}", path.display());
    validate(&options)?;
    Ok(options)
}

/// Write options to `path`, creating parent directories
pub fn save_options(path: &Path, options: &ProcessingOptions) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = options.to_json().map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err)
}

/// Reject options the pipeline cannot honour
pub fn validate(options: &ProcessingOptions) -> Result<(), ConfigError> {
    if options.max_size_bytes == 0 {
        return Err(ConfigError::InvalidValue("max_size_bytes must be positive".to_string()));
    }
    if options.max_width == 0 || options.max_height == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "max dimensions must be positive (got {}x{})",
            options.max_width, options.max_height
        )));
    }
    if !(options.quality > 0.0 && options.quality <= 1.0) {
        return Err(ConfigError::InvalidValue(format!(
            "quality must be in (0, 1] (got {})",
            options.quality
        )));
    }
    Ok(())
}
