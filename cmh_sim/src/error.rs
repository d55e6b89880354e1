//! Errors raised by the simulation harness.

use cmh_core::{ConfigError, DispatchError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatcher failure: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("--export needs exactly one run, got {0}")]
    ExportNeedsSingleRun(usize),
}
