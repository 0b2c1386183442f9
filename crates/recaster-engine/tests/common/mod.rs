//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use crossbeam_channel::Receiver;
use recaster_capture::{
    CaptureError, CaptureResult, FrameGrabber, FrameSourceOpener, VideoFrame, CAPTURE_INTERVAL,
};
use recaster_ipc::{AudioSelection, CaptureMode, EngineEvent, SessionConfig};

/// Frames at the capture cadence, like the real backends.
pub struct SyntheticGrabber {
    width: u32,
    height: u32,
    sequence: u64,
    last_frame: Option<Instant>,
}

impl FrameGrabber for SyntheticGrabber {
    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>> {
        if self.last_frame.is_some_and(|at| at.elapsed() < CAPTURE_INTERVAL) {
            return Ok(None);
        }
        self.last_frame = Some(Instant::now());
        self.sequence += 1;

        let shade = (self.sequence % 255) as u8;
        let data = vec![shade; VideoFrame::bgr_buffer_size(self.width, self.height)];
        Ok(Some(VideoFrame::new(
            Bytes::from(data),
            self.width,
            self.height,
            self.sequence,
        )))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

/// Full screen is 64x48, regions are their own size, cameras are never available.
pub struct SyntheticOpener;

impl FrameSourceOpener for SyntheticOpener {
    fn open(&self, mode: &CaptureMode) -> CaptureResult<Box<dyn FrameGrabber>> {
        let (width, height) = match mode {
            CaptureMode::FullScreen | CaptureMode::Window { .. } => (64, 48),
            CaptureMode::Region(region) => (region.width, region.height),
            CaptureMode::Camera { index } => {
                return Err(CaptureError::DeviceUnavailable(format!("camera {index}")))
            }
        };
        Ok(Box::new(SyntheticGrabber {
            width,
            height,
            sequence: 0,
            last_frame: None,
        }))
    }
}

/// A fresh empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "recaster-it-{name}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Full-screen, silence-audio session writing into `output_dir`.
pub fn silent_config(output_dir: &Path) -> SessionConfig {
    SessionConfig {
        capture: CaptureMode::FullScreen,
        audio: AudioSelection::Silence,
        output_dir: output_dir.to_path_buf(),
        ..Default::default()
    }
}

/// File names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Everything currently queued on an event channel.
pub fn drain_events(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    events.try_iter().collect()
}

/// Wait for an event matching `pred`.
pub fn wait_for_event(
    events: &Receiver<EngineEvent>,
    timeout: Duration,
    pred: impl Fn(&EngineEvent) -> bool,
) -> Option<EngineEvent> {
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

/// Stand-in encoder understanding the argument lists the engine builds.
///
/// Raw input to an `.mp4` is stored, a stream is discarded, a merge
/// concatenates its inputs, and a probe reports two seconds.
#[cfg(unix)]
const FAKE_ENCODER: &str = r#"#!/bin/sh
for arg in "$@"; do last="$arg"; done
case "$1" in
  -version) echo "fake encoder"; exit 0 ;;
  -hide_banner) echo "  Duration: 00:00:02.00, start: 0.000000, bitrate: 1 kb/s" >&2; exit 1 ;;
esac
case " $* " in
  *" copy "*) MERGE ;;
esac
case "$last" in
  *.mp4) exec cat > "$last" ;;
  *) exec cat > /dev/null ;;
esac
"#;

#[cfg(unix)]
fn write_script(name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let dir = scratch_dir(name);
    let path = dir.join("ffmpeg");
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Path to the stand-in encoder, written once per test process.
#[cfg(unix)]
pub fn fake_encoder() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        write_script(
            "encoder",
            &FAKE_ENCODER.replace("MERGE", r#"cat "$3" "$5" > "$last"; exit 0"#),
        )
    })
}

/// Stand-in encoder whose merges always fail.
#[cfg(unix)]
pub fn failing_mux_encoder() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        write_script(
            "broken-mux",
            &FAKE_ENCODER.replace("MERGE", r#"echo "Error: muxing failed" >&2; exit 1"#),
        )
    })
}

/// Stand-in encoder that stays alive without ever reading its input.
#[cfg(unix)]
pub fn stalled_encoder() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        write_script(
            "stalled",
            "#!/bin/sh\nif [ \"$1\" = \"-version\" ]; then exit 0; fi\nexec sleep 30\n",
        )
    })
}
