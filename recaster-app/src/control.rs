//! Operator commands read from stdin.

use std::path::PathBuf;

use recaster_ipc::{AudioSelection, EngineCommand, SessionConfig};

pub const HELP: &str = "\
commands:
  record              start recording
  stop                stop recording and save
  stream [url]        start streaming (to url, or the configured target)
  stopstream          stop streaming
  background [path]   set or clear the background track
  audio <silence|auto|N>
  devices             list audio inputs
  status              print engine status
  help
  quit";

/// One parsed input line.
#[derive(Debug)]
pub enum ControlInput {
    Engine(EngineCommand),
    /// Local settings were changed.
    Updated,
    Help,
    Quit,
}

/// Parse an audio selection: `silence`, `auto`, or a device index.
pub fn parse_audio(value: &str) -> Result<AudioSelection, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "silence" | "none" | "-1" => Ok(AudioSelection::Silence),
        "auto" => Ok(AudioSelection::Auto),
        other => other
            .parse::<usize>()
            .map(AudioSelection::Device)
            .map_err(|_| format!("invalid audio selection '{value}'")),
    }
}

/// Parse a line against the current session settings, updating them in place.
///
/// Blank lines give `Ok(None)`.
pub fn parse_line(line: &str, session: &mut SessionConfig) -> Result<Option<ControlInput>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let input = match command {
        "record" => ControlInput::Engine(EngineCommand::StartRecording {
            config: session.clone(),
        }),
        "stop" => ControlInput::Engine(EngineCommand::StopRecording),
        "stream" => {
            let mut config = session.clone();
            if let Some(url) = rest.first() {
                config.stream_url = url.to_string();
            }
            ControlInput::Engine(EngineCommand::StartStreaming { config })
        }
        "stopstream" => ControlInput::Engine(EngineCommand::StopStreaming),
        "background" => {
            session.background_track = (!rest.is_empty()).then(|| PathBuf::from(rest.join(" ")));
            ControlInput::Updated
        }
        "audio" => {
            let value = rest.first().ok_or("audio needs a selection")?;
            session.audio = parse_audio(value)?;
            ControlInput::Updated
        }
        "devices" => ControlInput::Engine(EngineCommand::GetAudioDevices),
        "status" => ControlInput::Engine(EngineCommand::GetStatus),
        "help" | "?" => ControlInput::Help,
        "quit" | "exit" => ControlInput::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_override_is_per_command() {
        let mut session = SessionConfig::default();
        match parse_line("stream rtmp://host/app/key", &mut session) {
            Ok(Some(ControlInput::Engine(EngineCommand::StartStreaming { config }))) => {
                assert_eq!(config.stream_url, "rtmp://host/app/key");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.stream_url.is_empty());
    }

    #[test]
    fn test_settings_update_session() {
        let mut session = SessionConfig::default();
        assert!(matches!(
            parse_line("audio 2", &mut session),
            Ok(Some(ControlInput::Updated))
        ));
        assert_eq!(session.audio, AudioSelection::Device(2));

        parse_line("background /music/loop one.wav", &mut session).unwrap();
        assert_eq!(session.background_track, Some(PathBuf::from("/music/loop one.wav")));
        parse_line("background", &mut session).unwrap();
        assert_eq!(session.background_track, None);

        match parse_line("record", &mut session) {
            Ok(Some(ControlInput::Engine(EngineCommand::StartRecording { config }))) => {
                assert_eq!(config.audio, AudioSelection::Device(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        let mut session = SessionConfig::default();
        assert!(parse_line("dance", &mut session).is_err());
        assert!(parse_line("audio", &mut session).is_err());
        assert!(parse_line("audio loud", &mut session).is_err());
        assert!(matches!(parse_line("   ", &mut session), Ok(None)));
    }

    #[test]
    fn test_parse_audio() {
        assert_eq!(parse_audio("Silence"), Ok(AudioSelection::Silence));
        assert_eq!(parse_audio("-1"), Ok(AudioSelection::Silence));
        assert_eq!(parse_audio("auto"), Ok(AudioSelection::Auto));
        assert_eq!(parse_audio("0"), Ok(AudioSelection::Device(0)));
    }
}
