//! External encoder process management.
//!
//! Encoding is delegated to an ffmpeg binary. This crate locates it, builds
//! its argument lists, and owns the running processes: the live stream
//! encoder, the recording video writer, and the one-shot offline jobs
//! (merge, transcode, duration probe).

mod command;
mod error;
mod locate;
mod muxer;
mod probe;
mod process;
mod video_writer;

pub use command::{
    mux_args, transcode_args, validate_stream_url, RecordCommand, StreamCommand,
};
pub use error::EncoderError;
pub use locate::{locate_encoder, verify_encoder, ENCODER_BINARY};
pub use muxer::{merge, merged_output_path, transcode_to_wav};
pub use probe::{parse_duration, probe_duration};
pub use process::{
    classify_line, extract_value, Diagnostic, EncoderProcess, EncoderProgress,
};
pub use video_writer::VideoFileWriter;

use std::time::Duration;

/// Capacity of the channel carrying encoder diagnostic lines.
pub const DIAGNOSTIC_CHANNEL_CAPACITY: usize = 256;

/// Chunks queued for an encoder's stdin before the oldest is dropped.
pub const INPUT_QUEUE_CAPACITY: usize = 2;

/// How long a freshly spawned encoder must survive to count as launched.
pub const LAUNCH_GRACE: Duration = Duration::from_millis(300);

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;
