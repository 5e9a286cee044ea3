//! Error types for the control plane.
//!
//! All supervisor, IPC, and orchestration failures are expressed through the
//! [`SupervisorError`] enum so callers can distinguish user errors (unknown
//! server, invalid state transitions) from operational failures.

use thiserror::Error;

/// Errors surfaced by the supervisor and its orchestrators.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start` was called while a process handle already exists.
    #[error("server '{0}' is already running")]
    AlreadyRunning(String),

    /// `stop` or a process-directed operation was called with no live process.
    #[error("server '{0}' is not running")]
    NotRunning(String),

    /// The logical server id is not present in the registry.
    #[error("unknown server '{0}'")]
    UnknownServer(String),

    /// The configured command could not be spawned. Never retried.
    #[error("failed to spawn server '{id}': {source}")]
    Spawn {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// IPC channel failure: no connection or the socket is not writable.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Update orchestration failure (git, dependency install).
    #[error("update error: {0}")]
    Update(String),

    /// Invalid configuration or request shape.
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying filesystem or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
