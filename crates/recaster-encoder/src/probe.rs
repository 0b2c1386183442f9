//! Media duration probe.

use std::path::Path;

use tracing::debug;

use crate::error::EncoderError;
use crate::muxer::run;
use crate::EncoderResult;

/// Parse `Duration: HH:MM:SS.xx` from encoder diagnostic output, in seconds.
pub fn parse_duration(text: &str) -> Option<f64> {
    let start = text.find("Duration:")? + "Duration:".len();
    let value = text[start..].trim_start();
    let end = value.find([',', '\n', '\r']).unwrap_or(value.len());
    let mut parts = value[..end].trim().split(':');

    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Duration of a media file in seconds.
///
/// Runs the encoder with only an input; it exits non-zero for lack of an
/// output but prints the container header first.
pub fn probe_duration(binary: &Path, path: &Path) -> EncoderResult<f64> {
    if !path.is_file() {
        return Err(EncoderError::Probe(format!("{} does not exist", path.display())));
    }

    let args = vec![
        "-hide_banner".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
    ];
    let output = run(binary, &args)?;
    let stderr = String::from_utf8_lossy(&output.stderr);

    let duration = parse_duration(&stderr)
        .ok_or_else(|| EncoderError::Probe(format!("no duration reported for {}", path.display())))?;
    debug!(path = %path.display(), duration, "Probed duration");
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        let text = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'out.mp4':\n  Duration: 00:01:02.50, start: 0.000000, bitrate: 1205 kb/s\n";
        assert_eq!(parse_duration(text), Some(62.5));
        assert_eq!(parse_duration("  Duration: 01:00:00.00\n"), Some(3600.0));
    }

    #[test]
    fn test_parse_duration_rejects_unknown() {
        assert_eq!(parse_duration("Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_duration("no header here"), None);
    }
}
