// src/chefext/error.rs — Enable handler error taxonomy
// Maintained by the chef-extension contributors | © 2025 | MIT licensed
// Fatal conditions only. Service outcomes and client-run errors are soft and never surface here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnableError>;

#[derive(Debug, Error)]
pub enum EnableError {
    /// Missing or unusable extension configuration. Reported to the host before returning.
    #[error("Configuration error. {0}")]
    Config(String),

    #[error("failed to decrypt protected settings: {0}")]
    Decrypt(String),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid json in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl EnableError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EnableError::Io { path: path.into(), source }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        EnableError::Json { context: context.into(), source }
    }
}

impl From<openssl::error::ErrorStack> for EnableError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        EnableError::Decrypt(err.to_string())
    }
}
