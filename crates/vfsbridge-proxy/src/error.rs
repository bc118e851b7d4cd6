//! Startup failures.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// Why a Caller could not be connected to an Executor.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot block inside an async runtime; connect from a plain thread")]
    InsideRuntime,

    #[error("executor stopped before the handshake completed")]
    ExecutorGone,

    #[error("executor rejected the handshake with code {0}")]
    Rejected(i32),

    #[error("failed to start executor thread: {0}")]
    Spawn(#[source] io::Error),
}
