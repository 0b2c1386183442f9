//! Capture, recording, and streaming orchestration for the recaster.
//!
//! The [`Controller`] owns the recording and streaming sessions and the
//! capture resources they share. The [`Engine`] drives it from a command
//! channel and reports back through an event channel.

mod controller;
mod error;
mod metrics;
mod orchestrator;
mod recording;
mod state;
mod streaming;
mod tick;

pub use controller::Controller;
pub use error::EngineError;
pub use metrics::{check_warnings, optimization_suggestions, PerformanceMonitor, SAMPLE_INTERVAL};
pub use orchestrator::Engine;
pub use recording::{
    format_elapsed, load_background, recording_paths, RecordingOutcome, RecordingSession,
};
pub use state::{CaptureInfo, CapturePhase, Holder, ResourceManager};
pub use streaming::{StreamFeed, StreamingSession};
pub use tick::{SinkSlot, TickSinks, VideoTick, TICK_INTERVAL};

use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use recaster_capture::NativeOpener;
use recaster_ipc::{EngineCommand, EngineEvent};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Create an engine using the platform capture backends and `encoder`.
pub fn create_engine(
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    encoder: PathBuf,
) -> Engine {
    let controller = Controller::new(encoder, Arc::new(NativeOpener), event_tx.clone());
    Engine::new(command_rx, event_tx, controller)
}
