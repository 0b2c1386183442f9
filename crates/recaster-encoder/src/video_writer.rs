//! Recording video writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, instrument, warn};

use crate::command::RecordCommand;
use crate::error::EncoderError;
use crate::process::EncoderProcess;
use crate::{EncoderResult, LAUNCH_GRACE};

/// Time allowed for the writer to flush and finalize its container on close.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(15);

/// Writes raw BGR frames to a video file through the encoder.
pub struct VideoFileWriter {
    process: EncoderProcess,
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
    write_failures: u64,
}

impl VideoFileWriter {
    /// Start a writer for `width`x`height` frames at a fixed 30 fps.
    #[instrument(name = "video_writer_open", skip(binary))]
    pub fn open(binary: &Path, path: &Path, width: u32, height: u32) -> EncoderResult<Self> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(EncoderError::InvalidInput(format!(
                "frame size {width}x{height} must be non-zero and even"
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(EncoderError::InvalidInput(format!(
                    "output directory {} does not exist",
                    parent.display()
                )));
            }
        }

        let args = RecordCommand::new(width, height, path).build();
        let mut process = EncoderProcess::spawn("video-writer", binary, &args)?;
        process.check_launch(LAUNCH_GRACE)?;

        info!(path = %path.display(), width, height, "Video writer opened");
        Ok(Self {
            process,
            path: path.to_path_buf(),
            width,
            height,
            frames_written: 0,
            write_failures: 0,
        })
    }

    /// Queue one frame. The buffer must be exactly `width * height * 3` bytes.
    ///
    /// Never blocks; a writer that falls behind drops its oldest pending frame.
    pub fn write(&mut self, bgr: Bytes) -> EncoderResult<()> {
        let expected = self.width as usize * self.height as usize * 3;
        if bgr.len() != expected {
            return Err(EncoderError::InvalidInput(format!(
                "frame has {} bytes, expected {expected}",
                bgr.len()
            )));
        }

        match self.process.send(bgr) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) => {
                self.write_failures += 1;
                if self.write_failures == 1 || self.write_failures % 100 == 0 {
                    warn!(failures = self.write_failures, "Video writer write failed: {}", e);
                }
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames accepted by [`Self::write`].
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Frames dropped because the encoder fell behind.
    pub fn frames_dropped(&self) -> u64 {
        self.process.input_counts().1
    }

    /// Close the input and wait for the file to be finalized.
    #[instrument(name = "video_writer_finish", skip(self), fields(path = %self.path.display()))]
    pub fn finish(mut self) -> EncoderResult<PathBuf> {
        let code = self.process.shutdown(FINALIZE_TIMEOUT);
        if code != Some(0) {
            return Err(EncoderError::Exited {
                code,
                detail: self.process.failure_detail(),
            });
        }

        let (written, dropped) = self.process.input_counts();
        info!(frames = written, dropped, "Video writer finished");
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_odd_dimensions() {
        let result = VideoFileWriter::open(Path::new("ffmpeg"), Path::new("out.mp4"), 201, 150);
        assert!(matches!(result, Err(EncoderError::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_missing_directory() {
        let result = VideoFileWriter::open(
            Path::new("ffmpeg"),
            Path::new("/definitely/not/here/out.mp4"),
            200,
            150,
        );
        assert!(matches!(result, Err(EncoderError::InvalidInput(_))));
    }
}
