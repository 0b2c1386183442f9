//! Offline encoder jobs: merging a recording and transcoding audio.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, info, instrument, warn};

use crate::command::{mux_args, transcode_args};
use crate::error::EncoderError;
use crate::EncoderResult;

/// `<dir>/<video stem>_merged.mp4`.
pub fn merged_output_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    video.with_file_name(format!("{stem}_merged.mp4"))
}

/// Merge `video` and `audio` into `output`, copying video and encoding AAC audio.
///
/// On any failure the output file is removed; the inputs are never touched.
#[instrument(name = "merge", skip(binary))]
pub fn merge(
    binary: &Path,
    video: &Path,
    audio: &Path,
    output: &Path,
    audio_bitrate_kbps: u32,
) -> EncoderResult<PathBuf> {
    let result = run_merge(binary, video, audio, output, audio_bitrate_kbps);
    if result.is_err() && output.exists() {
        if let Err(e) = fs::remove_file(output) {
            warn!(path = %output.display(), "Failed to remove partial merge output: {}", e);
        }
    }
    result
}

fn run_merge(
    binary: &Path,
    video: &Path,
    audio: &Path,
    output: &Path,
    audio_bitrate_kbps: u32,
) -> EncoderResult<PathBuf> {
    for input in [video, audio] {
        if !input.is_file() {
            return Err(EncoderError::Mux(format!("input {} is missing", input.display())));
        }
    }

    let out = run(binary, &mux_args(video, audio, output, audio_bitrate_kbps))
        .map_err(|e| EncoderError::Mux(e.to_string()))?;
    if !out.status.success() {
        return Err(EncoderError::Mux(format!(
            "encoder exited with {}: {}",
            out.status,
            stderr_tail(&out)
        )));
    }

    let size = fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(EncoderError::Mux(format!(
            "{} is missing or empty after merge",
            output.display()
        )));
    }

    info!(path = %output.display(), bytes = size, "Recording merged");
    Ok(output.to_path_buf())
}

/// Decode any audio file the encoder understands into a 16-bit PCM WAV.
#[instrument(name = "transcode_to_wav", skip(binary))]
pub fn transcode_to_wav(binary: &Path, input: &Path, output: &Path) -> EncoderResult<()> {
    let out = run(binary, &transcode_args(input, output))?;
    if !out.status.success() {
        let _ = fs::remove_file(output);
        return Err(EncoderError::Exited {
            code: out.status.code(),
            detail: stderr_tail(&out),
        });
    }
    debug!(output = %output.display(), "Transcoded audio to WAV");
    Ok(())
}

pub(crate) fn run(binary: &Path, args: &[String]) -> EncoderResult<Output> {
    debug!(binary = %binary.display(), args = %args.join(" "), "Running encoder job");
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }
    command
        .output()
        .map_err(|e| EncoderError::Launch(format!("{}: {e}", binary.display())))
}

/// Last non-empty stderr line, the one that usually says what went wrong.
pub(crate) fn stderr_tail(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "no diagnostic output".to_string())
}
