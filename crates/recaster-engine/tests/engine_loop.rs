//! The engine command loop.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use recaster_engine::{Controller, Engine};
use recaster_ipc::{
    command_channel, event_channel, EngineCommand, EngineEvent, FailureKind, SessionConfig,
};

use common::*;

#[test]
fn test_engine_reports_and_shuts_down() {
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let controller = Controller::new(
        PathBuf::from("/definitely/not/ffmpeg"),
        Arc::new(SyntheticOpener),
        event_tx.clone(),
    );
    let mut engine = Engine::new(command_rx, event_tx, controller);
    let handle = thread::spawn(move || engine.run());

    let timeout = Duration::from_secs(5);
    assert!(wait_for_event(&event_rx, timeout, |e| matches!(e, EngineEvent::Ready)).is_some());

    command_tx.send(EngineCommand::GetAudioDevices).unwrap();
    match wait_for_event(&event_rx, timeout, |e| matches!(e, EngineEvent::AudioDevices(_))) {
        Some(EngineEvent::AudioDevices(devices)) => assert!(devices[0].is_silence()),
        other => panic!("unexpected {other:?}"),
    }

    let dir = scratch_dir("engine");
    command_tx
        .send(EngineCommand::StartStreaming {
            config: silent_config(&dir),
        })
        .unwrap();
    match wait_for_event(&event_rx, timeout, |e| matches!(e, EngineEvent::Failure { .. })) {
        Some(EngineEvent::Failure { kind, .. }) => {
            assert_eq!(kind, FailureKind::EncoderLaunchFailure)
        }
        other => panic!("unexpected {other:?}"),
    }

    command_tx.send(EngineCommand::StopRecording).unwrap();
    match wait_for_event(&event_rx, timeout, |e| matches!(e, EngineEvent::Failure { .. })) {
        Some(EngineEvent::Failure { kind, .. }) => assert_eq!(kind, FailureKind::InvalidRequest),
        other => panic!("unexpected {other:?}"),
    }

    command_tx.send(EngineCommand::GetStatus).unwrap();
    match wait_for_event(&event_rx, timeout, |e| matches!(e, EngineEvent::Status(_))) {
        Some(EngineEvent::Status(status)) => {
            assert!(status.recording.is_idle());
            assert!(status.streaming.is_idle());
            assert!(!status.capture_held);
        }
        other => panic!("unexpected {other:?}"),
    }

    command_tx.send(EngineCommand::Shutdown).unwrap();
    assert!(wait_for_event(&event_rx, timeout, |e| matches!(e, EngineEvent::Shutdown)).is_some());
    handle.join().unwrap();
}

#[test]
fn test_engine_stops_when_commands_close() {
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let controller = Controller::new(
        PathBuf::from("ffmpeg"),
        Arc::new(SyntheticOpener),
        event_tx.clone(),
    );
    let mut engine = Engine::new(command_rx, event_tx, controller);
    let handle = thread::spawn(move || engine.run());

    drop(command_tx);
    handle.join().unwrap();
    let events = drain_events(&event_rx);
    assert!(matches!(events.first(), Some(EngineEvent::Ready)));
    assert!(matches!(events.last(), Some(EngineEvent::Shutdown)));
}

#[test]
fn test_session_config_round_trips_through_commands() {
    let config = SessionConfig {
        stream_url: "rtmp://live.example.com/app/key".into(),
        ..Default::default()
    };
    let json = serde_json::to_string(&EngineCommand::StartStreaming { config }).unwrap();
    let back: EngineCommand = serde_json::from_str(&json).unwrap();
    assert!(matches!(
        back,
        EngineCommand::StartStreaming { config } if config.stream_url.ends_with("/key")
    ));
}

#[cfg(unix)]
#[test]
fn test_health_is_polled_under_command_load() {
    let dir = scratch_dir("busy-loop");
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let mut controller = Controller::new(
        fake_encoder().to_path_buf(),
        Arc::new(SyntheticOpener),
        event_tx.clone(),
    );
    controller.start_streaming(&silent_config(&dir)).unwrap();
    let pid = controller.streaming_session().unwrap().pid();

    let mut engine = Engine::new(command_rx, event_tx, controller);
    let handle = thread::spawn(move || engine.run());

    std::process::Command::new("kill")
        .arg(pid.to_string())
        .status()
        .unwrap();

    // Status requests arrive faster than the loop's receive timeout.
    let mut failure = None;
    for _ in 0..150 {
        command_tx.send(EngineCommand::GetStatus).unwrap();
        thread::sleep(Duration::from_millis(20));
        failure = drain_events(&event_rx).into_iter().find_map(|event| match event {
            EngineEvent::Failure { kind, .. } => Some(kind),
            _ => None,
        });
        if failure.is_some() {
            break;
        }
    }
    assert_eq!(failure, Some(FailureKind::PipeWriteFailure));

    command_tx.send(EngineCommand::Shutdown).unwrap();
    handle.join().unwrap();
}
