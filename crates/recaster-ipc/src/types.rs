//! Common types used across IPC messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stream target used when the operator leaves the URL blank.
pub const DEFAULT_STREAM_URL: &str = "udp://127.0.0.1:1234";

/// Frame rate of every encoder-facing video stream.
pub const TARGET_FPS: u32 = 30;

/// Device index reserved for the silence generator.
pub const SILENCE_DEVICE_INDEX: i32 = -1;

/// A rectangle on screen, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureRegion {
    /// Create a region from its origin and size.
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Normalized rectangle spanned by two corner points, in any order.
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            left: x0.min(x1),
            top: y0.min(y1),
            width: x0.abs_diff(x1),
            height: y0.abs_diff(y1),
        }
    }

    /// Region covered by a window rectangle given as (left, top, right, bottom).
    pub fn from_window_rect(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self::from_corners(left, top, right, bottom)
    }

    /// Returns true if the region covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Dimensions rounded down to even values for YUV420 encoders.
    pub fn even_dimensions(&self) -> (u32, u32) {
        (self.width - self.width % 2, self.height - self.height % 2)
    }

    /// The "W x H" label shown while the region is being dragged.
    pub fn size_label(&self) -> String {
        format!("{} x {}", self.width, self.height)
    }
}

/// How video frames are captured.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureMode {
    /// The primary display.
    #[default]
    FullScreen,

    /// A fixed rectangle chosen by the operator.
    Region(CaptureRegion),

    /// The rectangle of a named window, resolved when capture starts.
    Window { title: String },

    /// A camera device.
    Camera { index: u32 },
}

impl CaptureMode {
    /// Returns the display name for this mode.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FullScreen => "Full screen",
            Self::Region(_) => "Region",
            Self::Window { .. } => "Window",
            Self::Camera { .. } => "Camera",
        }
    }
}

/// Which audio input feeds the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioSelection {
    /// Generate zero-valued samples.
    Silence,

    /// A specific input device by enumeration index.
    Device(usize),

    /// Pick the first loopback-style device.
    #[default]
    Auto,
}

impl AudioSelection {
    /// Map a device-list index to a selection. The silence sentinel maps to [`Self::Silence`].
    pub fn from_index(index: i32) -> Self {
        match usize::try_from(index) {
            Ok(index) => Self::Device(index),
            Err(_) => Self::Silence,
        }
    }

    /// Returns true if the silence generator is selected.
    pub fn is_silence(&self) -> bool {
        matches!(self, Self::Silence)
    }
}

/// An audio input device descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    /// Enumeration index, or [`SILENCE_DEVICE_INDEX`].
    pub index: i32,

    /// Display name.
    pub name: String,

    /// Maximum number of input channels.
    pub max_input_channels: u16,

    /// Native sample rate in Hz.
    pub default_sample_rate: u32,
}

impl AudioDeviceInfo {
    /// The silence sentinel entry that heads every device list.
    pub fn silence() -> Self {
        Self {
            index: SILENCE_DEVICE_INDEX,
            name: "静音/silence".to_string(),
            max_input_channels: 2,
            default_sample_rate: 44_100,
        }
    }

    /// Returns true for the silence sentinel.
    pub fn is_silence(&self) -> bool {
        self.index == SILENCE_DEVICE_INDEX
    }
}

/// Blend weights applied when mixing the background track into live audio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixRatio {
    pub live: f32,
    pub background: f32,
}

impl Default for MixRatio {
    fn default() -> Self {
        Self {
            live: 0.7,
            background: 0.3,
        }
    }
}

/// Configuration for a recording or streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Video capture mode.
    pub capture: CaptureMode,

    /// Audio input.
    pub audio: AudioSelection,

    /// Optional looping background track.
    pub background_track: Option<PathBuf>,

    /// Live/background blend weights.
    pub mix: MixRatio,

    /// Gain applied to the background track after decoding, in dB.
    pub background_gain_db: f32,

    /// Directory for recordings.
    pub output_dir: PathBuf,

    /// Stream target. Blank means [`DEFAULT_STREAM_URL`].
    pub stream_url: String,

    /// Target video bitrate in kbps (default: 2000).
    pub video_bitrate_kbps: u32,

    /// Maximum video bitrate in kbps (default: 2500).
    pub max_bitrate_kbps: u32,

    /// Rate-control buffer size in kbps (default: 2500).
    pub buffer_size_kbps: u32,

    /// Audio bitrate in kbps (default: 192).
    pub audio_bitrate_kbps: u32,

    /// Explicit encoder binary. When unset the binary is located automatically.
    pub encoder_path: Option<PathBuf>,
}

impl SessionConfig {
    /// The stream target, falling back to the default when blank.
    pub fn resolved_stream_url(&self) -> String {
        let url = self.stream_url.trim();
        if url.is_empty() {
            DEFAULT_STREAM_URL.to_string()
        } else {
            url.to_string()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture: CaptureMode::default(),
            audio: AudioSelection::default(),
            background_track: None,
            mix: MixRatio::default(),
            background_gain_db: 10.0,
            output_dir: PathBuf::from("."),
            stream_url: String::new(),
            video_bitrate_kbps: 2000,
            max_bitrate_kbps: 2500,
            buffer_size_kbps: 2500,
            audio_bitrate_kbps: 192,
            encoder_path: None,
        }
    }
}

/// Operator-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A camera, screen, or audio device could not be opened.
    DeviceUnavailable,

    /// The encoder process failed to start or exited immediately.
    EncoderLaunchFailure,

    /// Writing to the encoder pipe failed.
    PipeWriteFailure,

    /// Merging the recording failed; temporary files were kept.
    MuxFailure,

    /// Resources held by another capture mode prevent the transition.
    ResourceBusy,

    /// The request does not apply to the current state.
    InvalidRequest,

    /// Filesystem error.
    Io,
}

/// Severity of an encoder diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

/// Periodic streaming performance sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Achieved frames per second over the last cycle.
    pub fps: f32,

    /// Target frames per second.
    pub target_fps: f32,

    /// Encoder process CPU usage.
    pub encoder_cpu_percent: Option<f32>,

    /// Encoder process memory as a share of total memory.
    pub encoder_memory_percent: Option<f32>,

    /// Overall system CPU usage.
    pub system_cpu_percent: f32,

    /// Standard deviation of recent frame intervals, in milliseconds.
    pub jitter_ms: Option<f64>,
}

/// Types of performance warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarningType {
    /// Achieved frame rate deviates from the target.
    FrameRateDeviation {
        fps: f32,
        target_fps: f32,
        suggestions: Vec<String>,
    },

    /// High system CPU usage detected.
    HighCpuUsage { percent: f32 },

    /// Frame intervals are unstable.
    FrameJitter { jitter_ms: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_dimensions() {
        let region = CaptureRegion::new(0, 0, 201, 151);
        assert_eq!(region.even_dimensions(), (200, 150));

        let region = CaptureRegion::new(0, 0, 200, 150);
        assert_eq!(region.even_dimensions(), (200, 150));
    }

    #[test]
    fn test_even_dimensions_always_even() {
        for width in 1..64u32 {
            for height in 1..64u32 {
                let (w, h) = CaptureRegion::new(0, 0, width, height).even_dimensions();
                assert_eq!(w % 2, 0);
                assert_eq!(h % 2, 0);
                assert!(width - w <= 1 && height - h <= 1);
            }
        }
    }

    #[test]
    fn test_from_corners_normalizes() {
        let region = CaptureRegion::from_corners(300, 250, 100, 100);
        assert_eq!(region, CaptureRegion::new(100, 100, 200, 150));
        assert_eq!(region.size_label(), "200 x 150");
    }

    #[test]
    fn test_audio_selection_from_index() {
        assert_eq!(AudioSelection::from_index(SILENCE_DEVICE_INDEX), AudioSelection::Silence);
        assert_eq!(AudioSelection::from_index(3), AudioSelection::Device(3));
    }

    #[test]
    fn test_blank_stream_url_uses_default() {
        let mut config = SessionConfig::default();
        assert_eq!(config.resolved_stream_url(), DEFAULT_STREAM_URL);

        config.stream_url = "  rtmp://live.example.com/app/key ".to_string();
        assert_eq!(config.resolved_stream_url(), "rtmp://live.example.com/app/key");
    }

    #[test]
    fn test_session_config_partial_json() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"capture":{"Camera":{"index":1}},"audio":"Silence"}"#)
                .unwrap();
        assert_eq!(config.capture, CaptureMode::Camera { index: 1 });
        assert!(config.audio.is_silence());
        assert_eq!(config.video_bitrate_kbps, 2000);
    }
}
