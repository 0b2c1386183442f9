//! Audio capture, buffering, and background-track mixing.
//!
//! Live input comes either from a silence generator or, with the
//! `device-audio` feature, from a cpal input stream. Chunks flow through
//! bounded [`AudioBuffer`]s to the recording drain, optionally passing
//! through a [`BackgroundMixer`] that blends in a looping track.

mod buffer;
mod capture;
mod device;
mod error;
mod mixer;

pub use buffer::{AudioBuffer, AudioChunk};
pub use capture::{convert_block, AudioCapture, AudioFormat, BlockAssembler};
pub use device::{
    enumerate_input_devices, find_loopback_device, resolve_selection, ResolvedInput,
    LOOPBACK_KEYWORDS,
};
pub use error::AudioError;
pub use mixer::{blend, BackgroundMixer, BackgroundTrack, MixMode};

/// Default capacity of an [`AudioBuffer`], in chunks.
pub const AUDIO_BUFFER_CAPACITY: usize = 256;

/// Frames per captured or mixed chunk.
pub const BLOCK_FRAMES: usize = 1024;

/// Gain applied to device samples before conversion to 16-bit.
pub const INPUT_GAIN: f32 = 1.5;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;
