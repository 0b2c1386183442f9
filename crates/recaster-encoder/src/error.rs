//! Error types for the encoder module.

use thiserror::Error;

/// Errors that can occur while driving the encoder binary.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder binary could not be located or did not run.
    #[error("Encoder binary not found: {0}")]
    NotFound(String),

    /// The process could not be spawned.
    #[error("Failed to launch encoder: {0}")]
    Launch(String),

    /// The process exited right after launch.
    #[error("Encoder exited immediately (code {code:?}): {detail}")]
    ExitedEarly { code: Option<i32>, detail: String },

    /// The process exited with a failure status.
    #[error("Encoder exited with code {code:?}: {detail}")]
    Exited { code: Option<i32>, detail: String },

    /// Writing to the encoder's input pipe failed.
    #[error("Encoder pipe write failed: {0}")]
    PipeWrite(#[source] std::io::Error),

    /// The input pipe was already closed.
    #[error("Encoder input pipe is closed")]
    PipeClosed,

    /// Stream target is not a usable URL.
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    /// Input does not match what the encoder was configured for.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Merging audio and video failed.
    #[error("Mux failed: {0}")]
    Mux(String),

    /// Reading media information failed.
    #[error("Probe failed: {0}")]
    Probe(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
