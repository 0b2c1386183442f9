//! Encoder binary discovery.

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, instrument};

use crate::error::EncoderError;
use crate::EncoderResult;

/// File name of the encoder binary on this platform.
pub const ENCODER_BINARY: &str = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };

/// Find a working encoder binary.
///
/// An explicit path is used as-is. Otherwise the directory of the running
/// executable is checked first, then every entry of `PATH`.
#[instrument(name = "locate_encoder")]
pub fn locate_encoder(explicit: Option<&Path>) -> EncoderResult<PathBuf> {
    if let Some(path) = explicit {
        verify_encoder(path)?;
        info!(path = %path.display(), "Using configured encoder");
        return Ok(path.to_path_buf());
    }

    for candidate in candidates() {
        if !candidate.is_file() {
            continue;
        }
        match verify_encoder(&candidate) {
            Ok(()) => {
                info!(path = %candidate.display(), "Found encoder");
                return Ok(candidate);
            }
            Err(e) => debug!(path = %candidate.display(), "Skipping encoder candidate: {}", e),
        }
    }

    Err(EncoderError::NotFound(format!(
        "{ENCODER_BINARY} was not found next to the application or on PATH"
    )))
}

/// Run `<binary> -version` and require a successful exit.
pub fn verify_encoder(binary: &Path) -> EncoderResult<()> {
    let status = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| EncoderError::NotFound(format!("{}: {e}", binary.display())))?;

    if status.success() {
        Ok(())
    } else {
        Err(EncoderError::NotFound(format!(
            "{} -version exited with {status}",
            binary.display()
        )))
    }
}

fn candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(dir) = env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        candidates.push(dir.join(ENCODER_BINARY));
    }

    if let Some(path) = env::var_os("PATH") {
        candidates.extend(env::split_paths(&path).map(|dir| dir.join(ENCODER_BINARY)));
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_missing_binary_fails() {
        let missing = Path::new("/definitely/not/here/ffmpeg");
        assert!(matches!(
            locate_encoder(Some(missing)),
            Err(EncoderError::NotFound(_))
        ));
    }

    #[test]
    fn test_candidates_start_beside_executable() {
        let candidates = candidates();
        let exe_dir = env::current_exe().unwrap().parent().unwrap().to_path_buf();
        assert_eq!(candidates.first(), Some(&exe_dir.join(ENCODER_BINARY)));
    }
}
