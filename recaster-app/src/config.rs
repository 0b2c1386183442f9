//! Application configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use recaster_ipc::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";

/// Settings read from `config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where recordings are written. Defaults to the user's video folder.
    pub output_dir: Option<PathBuf>,

    /// Session settings applied to every recording and stream.
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load from `explicit`, or from the per-user config directory.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        Self::from_file(&path)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// The session config with the output directory resolved.
    pub fn session(&self) -> SessionConfig {
        let mut session = self.session.clone();
        session.output_dir = self.output_dir.clone().unwrap_or_else(default_output_dir);
        session
    }
}

/// `<config dir>/recaster/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "recaster").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// The user's video folder, else the working directory.
pub fn default_output_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recaster_ipc::AudioSelection;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("recaster-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = temp_file(
            "partial.json",
            r#"{ "output_dir": "/srv/videos", "session": { "audio": "Silence", "stream_url": "rtmp://host/app" } }"#,
        );
        let config = AppConfig::load(Some(&path)).unwrap();
        let session = config.session();

        assert_eq!(session.output_dir, PathBuf::from("/srv/videos"));
        assert_eq!(session.audio, AudioSelection::Silence);
        assert_eq!(session.resolved_stream_url(), "rtmp://host/app");
        assert_eq!(session.video_bitrate_kbps, 2000);
        assert_eq!(session.audio_bitrate_kbps, 192);
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        assert!(AppConfig::load(Some(Path::new("/definitely/not/config.json"))).is_err());
    }

    #[test]
    fn test_malformed_file_fails() {
        let path = temp_file("bad.json", "{ not json");
        assert!(AppConfig::load(Some(&path)).is_err());
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_output_dir_falls_back() {
        let config = AppConfig::default();
        assert_eq!(config.session().output_dir, default_output_dir());
    }
}
