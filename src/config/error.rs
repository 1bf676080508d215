// ABOUTME: Configuration errors: discovery, parsing, interpolation, validation.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::PlanError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("env key {0} is reserved; the daemon sets CUTOVER_* variables itself")]
    ReservedEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid deploy.strategy: {0}")]
    InvalidStrategy(#[from] PlanError),

    #[error("`{0}` must be configured to run the daemon")]
    MissingSection(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
