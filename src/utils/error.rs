//! Error types for podsession
//!
//! This module defines the error taxonomy of the playback session.
//! We use thiserror for the library error types and anyhow for
//! application-level error handling in the binary.

use crate::store::{EpisodeId, StoreError};
use thiserror::Error;

/// Main error type for podsession
#[derive(Error, Debug)]
pub enum SessionError {
    /// The playback engine adapter is not connected yet
    #[error("Playback engine not ready")]
    EngineNotReady,

    /// The playback engine reported an unrecoverable error
    #[error("Playback engine failed: {0}")]
    EngineFatal(String),

    /// Episode vanished from the store while the session was persisting it
    #[error("Episode not found in store: {0}")]
    StoreMiss(EpisodeId),

    /// Position observed for an episode that is no longer active
    #[error("Stale position for {got}, active episode is {expected:?}")]
    StaleAttribution {
        expected: Option<EpisodeId>,
        got: EpisodeId,
    },

    /// Episode store errors other than a miss
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The controller task is gone
    #[error("Session controller has shut down")]
    ControllerClosed,
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => SessionError::StoreMiss(id),
            other => SessionError::Store(other.to_string()),
        }
    }
}

/// Convenience type alias for Results in podsession
pub type Result<T> = std::result::Result<T, SessionError>;

/// Extension trait for converting other errors to SessionError
pub trait IntoSessionError<T> {
    /// Convert this error into a SessionError with the given context
    fn store_err(self, context: &str) -> Result<T>;
    fn config_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoSessionError<T> for std::result::Result<T, E> {
    fn store_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SessionError::Store(format!("{}: {}", context, e)))
    }

    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| SessionError::Config(format!("{}: {}", context, e)))
    }
}
