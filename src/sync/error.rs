//! Error types of the synchronization layer.

use thiserror::Error;

/// Failures reported by a session provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The session code is already taken.
    #[error("session code already in use")]
    Conflict,
    /// No session matches the requested id or code.
    #[error("session not found")]
    NotFound,
    /// The session was ended by its host.
    #[error("session has ended")]
    SessionEnded,
    /// The provider refused the request (wrong role, invalid payload).
    #[error("request rejected: {0}")]
    Rejected(String),
    /// Network failure or provider unavailable.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Only transport failures are worth retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

/// Errors surfaced by the device synchronization layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The provider call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// Every generated code collided with an existing session.
    #[error("no free session code after {attempts} attempts")]
    CodeSpaceExhausted {
        /// Codes tried.
        attempts: u32,
    },
    /// A command could not be delivered.
    #[error("command not delivered after {attempts} attempts")]
    RetriesExhausted {
        /// Writes tried.
        attempts: u32,
        /// Failure of the final write.
        #[source]
        last: RemoteError,
    },
    /// The typed code does not look like a session code.
    #[error("`{0}` is not a valid session code")]
    InvalidCode(String),
    /// No active session answers to the code.
    #[error("session not found")]
    NotFound,
    /// This device did not create the session.
    #[error("this device is not the host of the session")]
    NotHost,
    /// The push channel gave up reconnecting.
    #[error("connection lost, reload")]
    Disconnected,
    /// The shared game state does not match the envelope schema.
    #[error("malformed game state: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result alias for [`SyncError`].
pub type SyncResult<T> = Result<T, SyncError>;
