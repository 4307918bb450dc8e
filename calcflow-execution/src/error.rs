//! Error types for the engine supervisor

use calcflow_ipc::IpcError;
use thiserror::Error;

/// Engine supervisor errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine is not running")]
    EngineNotRunning,

    #[error("Failed to spawn sidecar '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sidecar process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
