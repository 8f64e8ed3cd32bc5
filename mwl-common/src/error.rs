//! Common error types for Mindwell

use thiserror::Error;
use uuid::Uuid;

/// Common result type for Mindwell operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the session engine and the history store
///
/// Audio and scheduling failures are recovered by the session engine and only
/// mirrored into observable state. Persistence failures always reach the caller.
#[derive(Error, Debug)]
pub enum Error {
    /// No audio output capability on this host; session degrades to visual-only
    #[error("Audio unsupported: {0}")]
    AudioUnsupported(String),

    /// Guidance track could not be fetched or decoded (retryable)
    #[error("Audio load error: {0}")]
    AudioLoad(String),

    /// Local file or cloud store read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error on a persisted record
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session id present in both stores with divergent fields
    #[error("Sync conflict on session {id}")]
    SyncConflict { id: Uuid },

    /// Malformed imported data; import rejected as a whole
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Requested record or script not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not valid in the current session phase
    #[error("Invalid transition: cannot {action} while {phase}")]
    InvalidTransition { action: &'static str, phase: String },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures of the local or cloud store
    ///
    /// The runner uses this to keep an unsaved session around for retry.
    pub fn is_persistence(&self) -> bool {
        match self {
            Error::Persistence(_) | Error::Io(_) | Error::Json(_) => true,
            #[cfg(feature = "sqlx")]
            Error::Database(_) => true,
            _ => false,
        }
    }

    /// True for failures the session absorbs (audio only)
    pub fn is_audio(&self) -> bool {
        matches!(self, Error::AudioUnsupported(_) | Error::AudioLoad(_))
    }
}
