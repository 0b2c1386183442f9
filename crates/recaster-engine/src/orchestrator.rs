//! Engine command loop.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use recaster_ipc::{EngineCommand, EngineEvent, StopReason};

use crate::controller::Controller;
use crate::error::EngineError;
use crate::metrics::SAMPLE_INTERVAL;
use crate::recording::RecordingOutcome;

/// Runs the controller on behalf of an operator connected by channels.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    controller: Controller,
    last_sample: Instant,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
        controller: Controller,
    ) -> Self {
        Self {
            command_rx,
            event_tx,
            controller,
            last_sample: Instant::now(),
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Run the engine (blocking) until shutdown or until the command channel closes.
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.shutdown();
                    break;
                }
            }

            // Runs on every turn so a busy command stream cannot starve it.
            self.poll_sessions();
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if the engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::StartRecording { config } => {
                if let Err(e) = self.controller.start_recording(&config) {
                    self.report_failure(e);
                }
            }
            EngineCommand::StopRecording => match self.controller.stop_recording() {
                Ok(outcome) => self.report_saved(outcome),
                Err(e) => self.report_failure(e),
            },
            EngineCommand::StartStreaming { config } => {
                if let Err(e) = self.controller.start_streaming(&config) {
                    self.report_failure(e);
                } else {
                    self.last_sample = Instant::now();
                }
            }
            EngineCommand::StopStreaming => {
                if let Err(e) = self.controller.stop_streaming(StopReason::UserRequested) {
                    self.report_failure(e);
                }
            }
            EngineCommand::GetAudioDevices => {
                let devices = self.controller.audio_devices();
                self.send_event(EngineEvent::AudioDevices(devices));
            }
            EngineCommand::GetStatus => {
                let status = self.controller.status();
                self.send_event(EngineEvent::Status(status));
            }
            EngineCommand::Shutdown => {
                self.shutdown();
                return false;
            }
        }

        true
    }

    fn poll_sessions(&mut self) {
        if let Some(e) = self.controller.poll_stream_health() {
            self.report_failure(e);
        }

        if self.last_sample.elapsed() >= SAMPLE_INTERVAL {
            self.last_sample = Instant::now();
            if let Some((report, warnings)) = self.controller.sample_performance() {
                self.send_event(EngineEvent::PerformanceReport(report));
                for warning in warnings {
                    self.send_event(EngineEvent::PerformanceWarning(warning));
                }
            }
        }
    }

    fn shutdown(&mut self) {
        match self.controller.shutdown() {
            Some(Ok(outcome)) => self.report_saved(outcome),
            Some(Err(e)) => self.report_failure(e),
            None => {}
        }
        self.send_event(EngineEvent::Shutdown);
    }

    fn report_saved(&self, outcome: RecordingOutcome) {
        self.send_event(EngineEvent::RecordingSaved {
            path: outcome.path,
            duration_secs: outcome.duration_secs,
        });
    }

    fn report_failure(&self, e: EngineError) {
        error!(kind = ?e.kind(), "{}", e);
        self.send_event(EngineEvent::Failure {
            kind: e.kind(),
            message: e.to_string(),
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}
