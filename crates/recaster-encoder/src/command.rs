//! Encoder argument builders.

use std::path::{Path, PathBuf};

use recaster_ipc::{SessionConfig, TARGET_FPS};
use url::Url;

use crate::error::EncoderError;
use crate::EncoderResult;

/// Arguments for the live stream encoder.
///
/// Raw BGR frames arrive on stdin. The output is a low-latency H.264 FLV
/// stream with one keyframe per second.
#[derive(Debug, Clone)]
pub struct StreamCommand {
    width: u32,
    height: u32,
    fps: u32,
    url: String,
    background: Option<PathBuf>,
    video_bitrate_kbps: u32,
    max_bitrate_kbps: u32,
    buffer_size_kbps: u32,
    audio_bitrate_kbps: u32,
}

impl StreamCommand {
    pub fn new(width: u32, height: u32, url: impl Into<String>) -> Self {
        Self {
            width,
            height,
            fps: TARGET_FPS,
            url: url.into(),
            background: None,
            video_bitrate_kbps: 2000,
            max_bitrate_kbps: 2500,
            buffer_size_kbps: 2500,
            audio_bitrate_kbps: 192,
        }
    }

    /// Take the target, bitrates, and background track from a session config.
    pub fn from_config(width: u32, height: u32, config: &SessionConfig) -> Self {
        Self::new(width, height, config.resolved_stream_url())
            .with_background(config.background_track.clone())
            .with_bitrates(
                config.video_bitrate_kbps,
                config.max_bitrate_kbps,
                config.buffer_size_kbps,
            )
            .with_audio_bitrate(config.audio_bitrate_kbps)
    }

    pub fn with_background(mut self, background: Option<PathBuf>) -> Self {
        self.background = background;
        self
    }

    pub fn with_bitrates(mut self, target_kbps: u32, max_kbps: u32, buffer_kbps: u32) -> Self {
        self.video_bitrate_kbps = target_kbps;
        self.max_bitrate_kbps = max_kbps;
        self.buffer_size_kbps = buffer_kbps;
        self
    }

    pub fn with_audio_bitrate(mut self, kbps: u32) -> Self {
        self.audio_bitrate_kbps = kbps;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn build(&self) -> Vec<String> {
        let fps = self.fps.to_string();
        let gop = fps.clone();

        let mut args: Vec<String> = [
            "-y",
            "-f", "rawvideo",
            "-vcodec", "rawvideo",
            "-pix_fmt", "bgr24",
            "-s", format!("{}x{}", self.width, self.height).as_str(),
            "-r", fps.as_str(),
            "-thread_queue_size", "4096",
            "-probesize", "32",
            "-analyzeduration", "0",
            "-i", "-",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(background) = &self.background {
            args.extend(
                [
                    "-stream_loop", "-1",
                    "-i", &*background.to_string_lossy(),
                    "-af", "aresample=async=1000",
                    "-c:a", "aac",
                    "-ar", "44100",
                    "-b:a", format!("{}k", self.audio_bitrate_kbps).as_str(),
                    "-map", "0:v",
                    "-map", "1:a",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
        }

        args.extend(
            [
                "-c:v", "libx264",
                "-preset", "superfast",
                "-tune", "zerolatency",
                "-profile:v", "baseline",
                "-pix_fmt", "yuv420p",
                "-b:v", format!("{}k", self.video_bitrate_kbps).as_str(),
                "-maxrate", format!("{}k", self.max_bitrate_kbps).as_str(),
                "-bufsize", format!("{}k", self.buffer_size_kbps).as_str(),
                "-r", fps.as_str(),
                "-g", gop.as_str(),
                "-keyint_min", gop.as_str(),
                "-sc_threshold", "0",
                "-max_muxing_queue_size", "2048",
                "-fps_mode", "cfr",
                "-x264opts", format!("no-scenecut:keyint={gop}:min-keyint={gop}").as_str(),
                "-f", "flv",
                self.url.as_str(),
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        args
    }
}

/// Arguments for the recording video writer: raw BGR on stdin to an MPEG-4 file.
#[derive(Debug, Clone)]
pub struct RecordCommand {
    width: u32,
    height: u32,
    fps: u32,
    output: PathBuf,
}

impl RecordCommand {
    pub fn new(width: u32, height: u32, output: impl Into<PathBuf>) -> Self {
        Self {
            width,
            height,
            fps: TARGET_FPS,
            output: output.into(),
        }
    }

    pub fn build(&self) -> Vec<String> {
        vec![
            "-y".into(),
            "-f".into(), "rawvideo".into(),
            "-pix_fmt".into(), "bgr24".into(),
            "-s".into(), format!("{}x{}", self.width, self.height),
            "-r".into(), self.fps.to_string(),
            "-i".into(), "-".into(),
            "-c:v".into(), "mpeg4".into(),
            "-q:v".into(), "5".into(),
            "-pix_fmt".into(), "yuv420p".into(),
            self.output.to_string_lossy().into_owned(),
        ]
    }
}

/// Arguments that copy the video stream and re-encode audio to AAC.
pub fn mux_args(video: &Path, audio: &Path, output: &Path, audio_bitrate_kbps: u32) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(), video.to_string_lossy().into_owned(),
        "-i".into(), audio.to_string_lossy().into_owned(),
        "-c:v".into(), "copy".into(),
        "-c:a".into(), "aac".into(),
        "-strict".into(), "experimental".into(),
        "-b:a".into(), format!("{audio_bitrate_kbps}k"),
        output.to_string_lossy().into_owned(),
    ]
}

/// Arguments that decode any audio file to 16-bit PCM WAV.
pub fn transcode_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(), input.to_string_lossy().into_owned(),
        "-vn".into(),
        "-acodec".into(), "pcm_s16le".into(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Check that a stream target parses and names a host.
pub fn validate_stream_url(target: &str) -> EncoderResult<Url> {
    let url = Url::parse(target).map_err(|e| EncoderError::InvalidUrl(format!("{target}: {e}")))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(EncoderError::InvalidUrl(format!("{target}: missing host")));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_stream_args_profile() {
        let args = StreamCommand::new(1280, 720, "udp://127.0.0.1:1234").build();

        assert_eq!(value_after(&args, "-s"), Some("1280x720"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("bgr24"));
        assert_eq!(value_after(&args, "-i"), Some("-"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-tune"), Some("zerolatency"));
        assert_eq!(value_after(&args, "-g"), Some("30"));
        assert_eq!(value_after(&args, "-keyint_min"), Some("30"));
        assert_eq!(value_after(&args, "-b:v"), Some("2000k"));
        assert_eq!(value_after(&args, "-maxrate"), Some("2500k"));
        assert_eq!(&args[args.len() - 2..], &["flv".to_string(), "udp://127.0.0.1:1234".to_string()]);
        assert!(!args.iter().any(|a| a == "-stream_loop"));
    }

    #[test]
    fn test_stream_input_options_precede_pipe() {
        let args = StreamCommand::new(2, 2, "udp://127.0.0.1:1234").build();
        let pipe = args.iter().position(|a| a == "-").unwrap();
        for flag in ["-thread_queue_size", "-probesize", "-analyzeduration"] {
            let at = args.iter().position(|a| a == flag).unwrap();
            assert!(at < pipe, "{flag} must be an input option");
        }
    }

    #[test]
    fn test_stream_args_with_background() {
        let mut config = SessionConfig::default();
        config.background_track = Some(PathBuf::from("bgm.mp3"));
        config.audio_bitrate_kbps = 160;
        let args = StreamCommand::from_config(640, 480, &config).build();

        let loop_at = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[loop_at + 1], "-1");
        assert_eq!(args[loop_at + 3], "bgm.mp3");
        assert_eq!(value_after(&args, "-af"), Some("aresample=async=1000"));
        assert_eq!(value_after(&args, "-b:a"), Some("160k"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
        assert_eq!(args.last().map(String::as_str), Some("udp://127.0.0.1:1234"));
    }

    #[test]
    fn test_record_and_mux_args() {
        let args = RecordCommand::new(200, 150, "out/recording.mp4").build();
        assert_eq!(value_after(&args, "-s"), Some("200x150"));
        assert_eq!(value_after(&args, "-r"), Some("30"));
        assert_eq!(args.last().map(String::as_str), Some("out/recording.mp4"));

        let args = mux_args(Path::new("v.mp4"), Path::new("a.wav"), Path::new("m.mp4"), 192);
        assert_eq!(value_after(&args, "-c:v"), Some("copy"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-strict"), Some("experimental"));
        assert_eq!(value_after(&args, "-b:a"), Some("192k"));
        assert_eq!(args.last().map(String::as_str), Some("m.mp4"));
    }

    #[test]
    fn test_validate_stream_url() {
        assert!(validate_stream_url("udp://127.0.0.1:1234").is_ok());
        assert!(validate_stream_url("rtmp://live.example.com/app/key").is_ok());
        assert!(validate_stream_url("not a url").is_err());
        assert!(validate_stream_url("file:///tmp/out.flv").is_err());
    }
}
