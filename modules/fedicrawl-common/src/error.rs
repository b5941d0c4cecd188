//! Typed errors shared by the crawl crates.

use std::path::PathBuf;

use thiserror::Error;

/// A raw record that cannot be turned into a row.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// An attribute every row needs (`id`, `uri`, `account`) is absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Configuration problems. These are reported before any network access.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not supplied
    #[error("missing setting: {0}")]
    Missing(&'static str),

    /// A setting was supplied but could not be parsed
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    /// Credentials file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Credentials file is not valid TOML of the expected shape
    #[error("failed to parse credentials: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
