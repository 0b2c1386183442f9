//! Events sent from the engine to the operator.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::{EngineStatus, RecordingPhase, StreamingPhase};
use crate::types::{AudioDeviceInfo, FailureKind, PerformanceReport, WarningType};

/// Events that the engine can send to the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// The recording sink changed phase.
    RecordingChanged {
        previous: RecordingPhase,
        current: RecordingPhase,
    },

    /// The streaming sink changed phase.
    StreamingChanged {
        previous: StreamingPhase,
        current: StreamingPhase,
    },

    /// A recording was finalized into a single deliverable file.
    RecordingSaved {
        path: PathBuf,

        /// Duration reported by the encoder binary, when it could be probed.
        duration_secs: Option<f64>,
    },

    /// An operation failed. The affected subsystem is back in a consistent state.
    Failure { kind: FailureKind, message: String },

    /// Periodic streaming performance sample.
    PerformanceReport(PerformanceReport),

    /// Streaming degradation detected.
    PerformanceWarning(WarningType),

    /// List of audio input devices, including the silence sentinel.
    AudioDevices(Vec<AudioDeviceInfo>),

    /// Status snapshot.
    Status(EngineStatus),

    /// Engine is ready to accept commands.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
