//! Commands sent from the operator to the engine.

use serde::{Deserialize, Serialize};

use crate::types::SessionConfig;

/// Commands that the operator can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Start recording to disk with the given configuration.
    StartRecording { config: SessionConfig },

    /// Stop the current recording and produce the merged deliverable.
    StopRecording,

    /// Start streaming with the given configuration.
    StartStreaming { config: SessionConfig },

    /// Stop the current stream.
    StopStreaming,

    /// Request the list of available audio input devices.
    GetAudioDevices,

    /// Request a status snapshot.
    GetStatus,

    /// Stop everything and shut the engine down.
    Shutdown,
}
