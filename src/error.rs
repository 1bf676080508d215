// ABOUTME: Application-wide error type for the cutover CLI.
// ABOUTME: Wraps the typed errors of each layer; uses thiserror.

use thiserror::Error;

use crate::config;
use crate::deploy::DeployError;
use crate::pipeline::PipelineError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to start proxy listeners: {0}")]
    Proxy(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
