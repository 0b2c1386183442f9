//! Recording sink.
//!
//! Video goes to a temporary MPEG-4 file through the encoder, audio to a
//! temporary WAV file through a drain thread. Stopping closes both and merges
//! them into a single deliverable.

use std::env;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use recaster_audio::{AudioBuffer, AudioError, BackgroundMixer, BackgroundTrack, MixMode};
use recaster_encoder::{
    merge, merged_output_path, probe_duration, transcode_to_wav, VideoFileWriter,
};
use recaster_ipc::SessionConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::error::EngineError;
use crate::state::CaptureInfo;
use crate::tick::SinkSlot;
use crate::EngineResult;

/// Poll interval of the audio drain.
const DRAIN_POLL: Duration = Duration::from_millis(10);

type AudioFileWriter = WavWriter<BufWriter<File>>;

/// Result of a finished recording.
#[derive(Debug, Clone)]
pub struct RecordingOutcome {
    /// The merged deliverable.
    pub path: PathBuf,

    /// Duration reported by the encoder, if it could be read.
    pub duration_secs: Option<f64>,

    /// Wall-clock recording time.
    pub elapsed: Duration,
}

/// Format a duration as `HH:MM:SS`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Temporary video and audio paths for a recording started now.
///
/// Names carry a millisecond timestamp. A numeric suffix is added while any of
/// the video, audio, or merged paths already exists.
pub fn recording_paths(output_dir: &Path) -> (PathBuf, PathBuf) {
    let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
    let mut stem = format!("recording_{stamp}");
    let mut suffix = 0u32;
    loop {
        let video = output_dir.join(format!("{stem}.mp4"));
        let audio = output_dir.join(format!("{stem}.wav"));
        if !video.exists() && !audio.exists() && !merged_output_path(&video).exists() {
            return (video, audio);
        }
        suffix += 1;
        stem = format!("recording_{stamp}_{suffix}");
    }
}

/// Decode a background track, transcoding it to WAV first if needed.
#[instrument(name = "load_background", skip(encoder))]
pub fn load_background(encoder: &Path, path: &Path, gain_db: f32) -> EngineResult<BackgroundTrack> {
    let track = match BackgroundTrack::from_wav(path) {
        Ok(track) => track,
        Err(AudioError::FormatNotSupported(reason)) => {
            debug!(reason = %reason, "Transcoding background track");
            let scratch = env::temp_dir().join(format!("recaster_background_{}.wav", process::id()));
            transcode_to_wav(encoder, path, &scratch)
                .map_err(|e| EngineError::DeviceUnavailable(format!("background track: {e}")))?;
            let track = BackgroundTrack::from_wav(&scratch);
            if let Err(e) = fs::remove_file(&scratch) {
                debug!("Failed to remove transcoded track: {}", e);
            }
            track?
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        frames = track.frames(),
        channels = track.channels(),
        sample_rate = track.sample_rate(),
        gain_db,
        "Background track loaded"
    );
    Ok(track.with_gain_db(gain_db))
}

/// An active recording.
pub struct RecordingSession {
    video_path: PathBuf,
    audio_path: PathBuf,
    started_at: Instant,
    encoder: PathBuf,
    audio_bitrate_kbps: u32,
    writer: SinkSlot<VideoFileWriter>,
    mixer: Option<BackgroundMixer>,
    should_stop: Arc<AtomicBool>,
    drain_thread: Option<JoinHandle<Result<u64, hound::Error>>>,
}

impl RecordingSession {
    /// Open both writers and install the video writer as the tick's recording sink.
    ///
    /// On failure nothing is left open and no temporary file remains.
    #[instrument(name = "recording_start", skip_all)]
    pub fn start(
        encoder: &Path,
        config: &SessionConfig,
        capture: &CaptureInfo,
        slot: SinkSlot<VideoFileWriter>,
    ) -> EngineResult<Self> {
        fs::create_dir_all(&config.output_dir)?;
        let (video_path, audio_path) = recording_paths(&config.output_dir);
        let (width, height) = capture.frame_size;
        let format = capture.audio_format;

        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let wav = WavWriter::create(&audio_path, spec)?;

        let video = match VideoFileWriter::open(encoder, &video_path, width, height) {
            Ok(video) => video,
            Err(e) => {
                drop(wav);
                remove_quietly(&audio_path);
                remove_quietly(&video_path);
                return Err(e.into());
            }
        };

        // With a background track the drain reads the mixer's output instead
        // of the live buffer.
        let background = config.background_track.as_deref().and_then(|path| {
            load_background(encoder, path, config.background_gain_db)
                .map_err(|e| warn!("Recording without background track: {}", e))
                .ok()
        });
        let (mixer, drain_source) = match background {
            Some(track) => {
                let output = AudioBuffer::default();
                let mode = if capture.audio_is_silence {
                    MixMode::Silence
                } else {
                    MixMode::Live
                };
                match BackgroundMixer::start(
                    track,
                    mode,
                    capture.audio_buffer.clone(),
                    output.clone(),
                    format,
                    config.mix,
                ) {
                    Ok(mixer) => (Some(mixer), output),
                    Err(e) => {
                        warn!("Background mixer failed to start: {}", e);
                        (None, capture.audio_buffer.clone())
                    }
                }
            }
            None => (None, capture.audio_buffer.clone()),
        };

        let should_stop = Arc::new(AtomicBool::new(false));
        let drain = {
            let should_stop = Arc::clone(&should_stop);
            thread::Builder::new()
                .name("recording-drain".to_string())
                .spawn(move || drain_loop(wav, drain_source, should_stop))
        };
        let drain = match drain {
            Ok(handle) => handle,
            Err(e) => {
                drop(mixer);
                let _ = video.finish();
                remove_quietly(&audio_path);
                remove_quietly(&video_path);
                return Err(EngineError::Io(e));
            }
        };

        *slot.lock() = Some(video);

        info!(
            video = %video_path.display(),
            audio = %audio_path.display(),
            width,
            height,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Recording started"
        );
        Ok(Self {
            video_path,
            audio_path,
            started_at: Instant::now(),
            encoder: encoder.to_path_buf(),
            audio_bitrate_kbps: config.audio_bitrate_kbps,
            writer: slot,
            mixer,
            should_stop,
            drain_thread: Some(drain),
        })
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn audio_path(&self) -> &Path {
        &self.audio_path
    }

    /// Time since the recording started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Close both writers, then merge them into the deliverable.
    ///
    /// Temporary files are removed only after a successful merge.
    #[instrument(name = "recording_finish", skip(self), fields(video = %self.video_path.display()))]
    pub fn finish(mut self) -> EngineResult<RecordingOutcome> {
        let elapsed = self.elapsed();
        let writer = self.writer.lock().take();

        if let Some(mut mixer) = self.mixer.take() {
            mixer.stop();
        }
        let audio = self.stop_drain();

        let video = match writer {
            Some(writer) => writer.finish().map(|_| ()),
            None => Ok(()),
        };

        match audio {
            Ok(frames) => debug!(frames, "Audio file closed"),
            Err(e) => {
                error!("Audio file failed: {}", e);
                return Err(e);
            }
        }
        if let Err(e) = video {
            error!("Video file failed: {}", e);
            return Err(e.into());
        }

        let output = merged_output_path(&self.video_path);
        let path = merge(
            &self.encoder,
            &self.video_path,
            &self.audio_path,
            &output,
            self.audio_bitrate_kbps,
        )
        .map_err(|e| {
            error!(
                video = %self.video_path.display(),
                audio = %self.audio_path.display(),
                "Merge failed, keeping temporary files: {}",
                e
            );
            EngineError::from(e)
        })?;

        remove_quietly(&self.video_path);
        remove_quietly(&self.audio_path);

        let duration_secs = match probe_duration(&self.encoder, &path) {
            Ok(duration) => Some(duration),
            Err(e) => {
                warn!("Could not read recording duration: {}", e);
                None
            }
        };

        info!(
            path = %path.display(),
            elapsed = %format_elapsed(elapsed),
            ?duration_secs,
            "Recording saved"
        );
        Ok(RecordingOutcome {
            path,
            duration_secs,
            elapsed,
        })
    }

    fn stop_drain(&mut self) -> EngineResult<u64> {
        self.should_stop.store(true, Ordering::SeqCst);
        match self.drain_thread.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result.map_err(EngineError::from),
                Err(_) => Err(EngineError::Io(std::io::Error::other(
                    "audio drain thread panicked",
                ))),
            },
            None => Ok(0),
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(mut mixer) = self.mixer.take() {
            mixer.stop();
        }
        if self.drain_thread.is_some() {
            let _ = self.stop_drain();
        }
    }
}

fn drain_loop(
    mut writer: AudioFileWriter,
    buffer: AudioBuffer,
    should_stop: Arc<AtomicBool>,
) -> Result<u64, hound::Error> {
    let mut frames: u64 = 0;

    loop {
        // Sample the flag before popping so chunks queued before the stop
        // request are still written.
        let stopping = should_stop.load(Ordering::SeqCst);
        match buffer.pop_timeout(DRAIN_POLL) {
            Some(chunk) => {
                for sample in &chunk.samples {
                    writer.write_sample(*sample)?;
                }
                frames += chunk.frames() as u64;
            }
            None if stopping => break,
            None => {}
        }
    }

    writer.finalize()?;
    Ok(frames)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove file: {}", e);
        }
    }
}
