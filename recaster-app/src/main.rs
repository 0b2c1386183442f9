//! Recaster operator binary.
//!
//! Reads commands from stdin and prints engine events as JSON lines on stdout.

mod config;
mod control;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recaster_engine::create_engine;
use recaster_encoder::locate_encoder;
use recaster_ipc::{
    command_channel, event_channel, AudioSelection, CaptureMode, CaptureRegion, EngineCommand,
    EngineEvent,
};

use crate::config::AppConfig;
use crate::control::{parse_audio, parse_line, ControlInput, HELP};

#[derive(Debug, Parser)]
#[command(name = "recaster", version, about = "Record and live-stream the screen or a camera")]
struct Cli {
    /// Config file. Defaults to the per-user config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for recordings.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Stream target URL.
    #[arg(long)]
    url: Option<String>,

    /// Encoder binary. Located automatically when omitted.
    #[arg(long)]
    encoder: Option<PathBuf>,

    /// Capture a rectangle: LEFT,TOP,WIDTH,HEIGHT.
    #[arg(long, value_parser = parse_region, conflicts_with_all = ["window", "camera"])]
    region: Option<CaptureRegion>,

    /// Capture the window with this title.
    #[arg(long, conflicts_with = "camera")]
    window: Option<String>,

    /// Capture the camera with this index.
    #[arg(long)]
    camera: Option<u32>,

    /// Audio input: silence, auto, or a device index.
    #[arg(long, value_parser = parse_audio)]
    audio: Option<AudioSelection>,

    /// Looping background track.
    #[arg(long)]
    background: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        let session = &mut config.session;
        if let Some(url) = &self.url {
            session.stream_url = url.clone();
        }
        if let Some(encoder) = &self.encoder {
            session.encoder_path = Some(encoder.clone());
        }
        if let Some(region) = self.region {
            session.capture = CaptureMode::Region(region);
        } else if let Some(title) = &self.window {
            session.capture = CaptureMode::Window {
                title: title.clone(),
            };
        } else if let Some(index) = self.camera {
            session.capture = CaptureMode::Camera { index };
        }
        if let Some(audio) = self.audio {
            session.audio = audio;
        }
        if let Some(track) = &self.background {
            session.background_track = Some(track.clone());
        }
    }
}

fn parse_region(value: &str) -> Result<CaptureRegion, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [left, top, width, height] = parts.as_slice() else {
        return Err("expected LEFT,TOP,WIDTH,HEIGHT".to_string());
    };
    let coord = |s: &str| s.parse::<i32>().map_err(|e| format!("'{s}': {e}"));
    let size = |s: &str| s.parse::<u32>().map_err(|e| format!("'{s}': {e}"));

    let region = CaptureRegion::new(coord(*left)?, coord(*top)?, size(*width)?, size(*height)?);
    if region.even_dimensions().0 == 0 || region.even_dimensions().1 == 0 {
        return Err("region must be at least 2x2".to_string());
    }
    Ok(region)
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "recaster=info,recaster_engine=debug,recaster_capture=info,recaster_audio=info,recaster_encoder=info".into()
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn print_events(event_rx: Receiver<EngineEvent>) {
    let stdout = io::stdout();
    for event in event_rx {
        match serde_json::to_string(&event) {
            Ok(line) => {
                let mut out = stdout.lock();
                if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
    }
}

fn control_loop(command_tx: &Sender<EngineCommand>, config: &AppConfig) -> Result<()> {
    let mut session = config.session();
    for line in io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        match parse_line(&line, &mut session) {
            Ok(None) => {}
            Ok(Some(ControlInput::Engine(command))) => {
                if command_tx.send(command).is_err() {
                    error!("Engine stopped");
                    return Ok(());
                }
            }
            Ok(Some(ControlInput::Updated)) => {
                info!(audio = ?session.audio, background = ?session.background_track, "Settings updated");
            }
            Ok(Some(ControlInput::Help)) => eprintln!("{HELP}"),
            Ok(Some(ControlInput::Quit)) => break,
            Err(message) => eprintln!("{message}"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    info!("Recaster starting");

    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    let encoder = locate_encoder(config.session.encoder_path.as_deref())
        .context("an ffmpeg binary is required")?;

    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();

    let engine_thread = thread::Builder::new()
        .name("engine".into())
        .spawn(move || {
            let mut engine = create_engine(command_rx, event_tx, encoder);
            engine.run();
        })
        .context("spawning engine thread")?;
    let printer_thread = thread::Builder::new()
        .name("events".into())
        .spawn(move || print_events(event_rx))
        .context("spawning event thread")?;

    let result = control_loop(&command_tx, &config);

    // A dropped channel also stops the engine; Shutdown makes it explicit.
    let _ = command_tx.send(EngineCommand::Shutdown);
    drop(command_tx);
    if engine_thread.join().is_err() {
        error!("Engine thread panicked");
    }
    if printer_thread.join().is_err() {
        error!("Event thread panicked");
    }

    info!("Recaster stopped");
    result
}
