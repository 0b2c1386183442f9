//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capture source not found.
    #[error("Capture source not found: {0}")]
    SourceNotFound(String),

    /// Device exists but could not be opened.
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capture mode not compiled into this build.
    #[error("Capture not supported: {0}")]
    NotSupported(String),

    /// The requested region is empty or outside the display.
    #[error("Invalid capture region: {0}")]
    InvalidRegion(String),

    /// Frame conversion error.
    #[error("Frame conversion error: {0}")]
    FrameConversion(String),

    /// Error reported by the platform backend.
    #[error("Capture backend error: {0}")]
    Backend(String),

    /// The backend thread exited before reporting readiness.
    #[error("Capture thread exited during startup")]
    ThreadExited,
}
