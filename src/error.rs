//! Error types for playback operations

use std::time::Duration;

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Errors raised by the playback engine and its control surface
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    /// A value could not be turned into a command timestamp
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Playback rate must be finite and greater than zero
    #[error("Invalid playback rate: {0}")]
    InvalidRate(f64),

    /// Event interval must be greater than zero
    #[error("Invalid playback interval: {0:?}")]
    InvalidInterval(Duration),

    /// Operation was called with an argument it cannot act on
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Flag/comment requested before any command was released
    #[error("No command has been released yet")]
    NoCurrentCommand,

    /// A second consumer tried to pull while another pull was pending
    #[error("Another consumer is already pulling from this playback")]
    ConcurrentPull,

    /// The playback was shut down while a pull was waiting
    #[error("Playback cancelled")]
    Cancelled,
}
