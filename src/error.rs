//! Error types for backup and restore operations.

use std::io;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackupError>;

/// Errors that can occur while running the backup engine.
#[derive(Error, Debug)]
pub enum BackupError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// A spawned task panicked or was aborted.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The requested backup config does not exist.
    #[error("Backup config not found: {0}")]
    ConfigNotFound(Uuid),

    /// The requested job does not exist.
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// The requested backup file does not exist.
    #[error("Backup file not found: {0}")]
    FileNotFound(Uuid),

    /// A config failed validation.
    #[error("Invalid backup config: {0}")]
    InvalidConfig(String),

    /// Serializing, compressing, encrypting or writing the artifact failed.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// The artifact could not be decoded back into a snapshot.
    #[error("Restore parse error: {0}")]
    RestoreParse(String),

    /// Stored artifact bytes no longer match the recorded checksum.
    #[error("Checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// A pipeline stage ran past its deadline.
    #[error("Stage '{stage}' exceeded its deadline of {limit:?}")]
    StageTimeout { stage: &'static str, limit: Duration },

    /// A run for this config is already in flight and exclusive runs are on.
    #[error("A backup for config {0} is already running")]
    AlreadyRunning(Uuid),

    /// Metadata store failure.
    #[error("Metadata store error: {0}")]
    Store(String),

    /// The data sink rejected restored records.
    #[error("Replay failed for {entity}: {reason}")]
    Replay { entity: String, reason: String },

    /// Destination upload failure surfaced as an error (normally only a warning).
    #[error(transparent)]
    Destination(#[from] crate::destination::DestinationError),
}

impl BackupError {
    pub fn packaging(msg: impl Into<String>) -> Self {
        Self::Packaging(msg.into())
    }

    pub fn restore_parse(msg: impl Into<String>) -> Self {
        Self::RestoreParse(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
