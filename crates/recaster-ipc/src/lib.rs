//! Typed operator<->engine messages for the recaster.
//!
//! This crate defines the message, configuration, and state types shared
//! between the operator-facing front end and the engine core.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{EngineStatus, RecordingPhase, StopReason, StreamingPhase};
pub use types::{
    AudioDeviceInfo, AudioSelection, CaptureMode, CaptureRegion, DiagnosticLevel, FailureKind,
    MixRatio, PerformanceReport, SessionConfig, WarningType, DEFAULT_STREAM_URL,
    SILENCE_DEVICE_INDEX, TARGET_FPS,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (operator → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → operator).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
