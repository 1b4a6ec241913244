// src/config/mod.rs
//! Application configuration: one TOML file plus a handful of env overrides.

pub mod ai;
pub mod app;

use std::path::PathBuf;

use thiserror::Error;

pub use app::AppConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A secret is set to the literal `ENV` but its variable is missing.
    #[error("`{field}` is set to ENV but {var} is not set")]
    MissingEnv {
        field: &'static str,
        var: &'static str,
    },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
