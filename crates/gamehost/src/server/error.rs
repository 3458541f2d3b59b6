//! Server session error types.

use thiserror::Error;

use crate::container::ContainerError;

/// Result type for server session operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by server lifecycle and interactive session operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The container runtime call failed. Propagated to the caller of the
    /// lifecycle operation; no retry at this layer.
    #[error(transparent)]
    Runtime(#[from] ContainerError),

    /// An interactive write targeted an exec id this server does not own,
    /// or one whose process has already exited. No write is performed.
    #[error("no open session with exec id '{0}'")]
    InvalidSession(String),

    /// A script name is already attached to an open session.
    #[error("script name '{0}' is already in use by an open session")]
    NameCollision(String),

    /// A user exec tried to claim one of the reserved lifecycle script names.
    #[error("'{0}' is a reserved script name")]
    ReservedName(String),

    /// A bounded interactive write did not complete in time.
    #[error("write to session '{0}' timed out")]
    WriteTimeout(String),

    /// Writing to a session's input stream failed.
    #[error("stream write failed: {0}")]
    StreamWrite(std::io::Error),

    /// Materializing a script file on the host failed.
    #[error("failed to write script '{path}': {source}")]
    ScriptWrite {
        path: String,
        source: std::io::Error,
    },
}
