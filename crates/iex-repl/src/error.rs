//! Engine errors

use std::path::PathBuf;

use thiserror::Error;

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn interpreter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("interpreter {0} pipe is not available")]
    PipeUnavailable(&'static str),

    #[error("write to interpreter failed: process is gone")]
    WriteFailed,

    #[error("interpreter exited before the session became ready")]
    StartupAborted,

    #[error("failed to read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to scan build directory {path}: {source}")]
    BuildDirScan {
        path: PathBuf,
        source: std::io::Error,
    },
}
