//! A running encoder process and its diagnostic watcher.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use recaster_ipc::DiagnosticLevel;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::EncoderError;
use crate::{EncoderResult, DIAGNOSTIC_CHANNEL_CAPACITY, INPUT_QUEUE_CAPACITY};

/// Watcher poll interval; bounds how long it takes to observe a stop request.
const WATCH_POLL: Duration = Duration::from_millis(100);

/// Minimum spacing of progress log lines.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Diagnostics kept for operator inspection.
const RECENT_DIAGNOSTICS: usize = 32;

/// Classify a diagnostic line by the words it contains.
pub fn classify_line(line: &str) -> DiagnosticLevel {
    let lower = line.to_lowercase();
    if lower.contains("error") {
        DiagnosticLevel::Error
    } else if lower.contains("warning") {
        DiagnosticLevel::Warning
    } else {
        DiagnosticLevel::Info
    }
}

/// Value following `key` in a progress line, e.g. `fps=` in `fps= 29.9`.
pub fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value = after_key.trim_start();
    let end = value.find(char::is_whitespace).unwrap_or(value.len());
    if end == 0 {
        return None;
    }
    Some(value[..end].to_string())
}

/// One classified diagnostic line.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// Snapshot of the encoder's periodic progress line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderProgress {
    pub frame: Option<u64>,
    pub fps: Option<f32>,
    pub time: Option<String>,
    pub bitrate: Option<String>,
    pub speed: Option<String>,
}

impl EncoderProgress {
    /// Parse a progress line. Lines without `time=` and `bitrate=` are not progress.
    pub fn parse(line: &str) -> Option<Self> {
        if !(line.contains("time=") && line.contains("bitrate=")) {
            return None;
        }
        Some(Self {
            frame: extract_value(line, "frame=").and_then(|v| v.parse().ok()),
            fps: extract_value(line, "fps=").and_then(|v| v.parse().ok()),
            time: extract_value(line, "time="),
            bitrate: extract_value(line, "bitrate="),
            speed: extract_value(line, "speed="),
        })
    }
}

#[derive(Debug, Default)]
struct WatchState {
    last_error: Option<String>,
    progress: Option<EncoderProgress>,
    recent: VecDeque<Diagnostic>,
    errors: u64,
    warnings: u64,
}

/// Input side of the process: a bounded queue drained by the stdin thread.
struct InputQueue {
    input_tx: Option<Sender<Bytes>>,
    evict_rx: Receiver<Bytes>,
    pipe_error: Arc<Mutex<Option<String>>>,
    written: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    writer_thread: Option<JoinHandle<()>>,
}

/// An encoder child process fed through its stdin.
///
/// Stdin is written on a dedicated thread fed by a bounded queue, so a stalled
/// encoder never blocks the caller. Stderr is read on another thread and
/// classified by a watcher thread that polls with a bounded timeout.
pub struct EncoderProcess {
    label: &'static str,
    child: Child,
    input: InputQueue,
    state: Arc<Mutex<WatchState>>,
    dropped_lines: Arc<AtomicU64>,
    should_stop: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
    watcher_thread: Option<JoinHandle<()>>,
    exit: Option<Option<i32>>,
}

impl EncoderProcess {
    /// Spawn `binary` with `args`, piping stdin and stderr.
    #[instrument(name = "encoder_spawn", skip(binary, args))]
    pub fn spawn(label: &'static str, binary: &Path, args: &[String]) -> EncoderResult<Self> {
        debug!(binary = %binary.display(), args = %args.join(" "), "Spawning encoder");

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command
            .spawn()
            .map_err(|e| EncoderError::Launch(format!("{}: {e}", binary.display())))?;
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        let state = Arc::new(Mutex::new(WatchState::default()));
        let dropped_lines = Arc::new(AtomicU64::new(0));
        let should_stop = Arc::new(AtomicBool::new(false));

        let threads = spawn_threads(
            label,
            stderr,
            Arc::clone(&state),
            Arc::clone(&dropped_lines),
            Arc::clone(&should_stop),
        );
        let threads = threads.and_then(|handles| Ok((handles, spawn_input(label, stdin)?)));
        let ((reader_thread, watcher_thread), input) = match threads {
            Ok(parts) => parts,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                should_stop.store(true, Ordering::SeqCst);
                return Err(e);
            }
        };

        info!(label, pid = child.id(), "Encoder started");
        Ok(Self {
            label,
            child,
            input,
            state,
            dropped_lines,
            should_stop,
            reader_thread,
            watcher_thread: Some(watcher_thread),
            exit: None,
        })
    }

    /// Fail if the process exits within `grace` of launch.
    pub fn check_launch(&mut self, grace: Duration) -> EncoderResult<()> {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(code) = self.exit_code() {
                self.close_input();
                self.join_threads();
                return Err(EncoderError::ExitedEarly {
                    code,
                    detail: self.failure_detail(),
                });
            }
            thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    /// Queue bytes for the process's stdin without blocking.
    ///
    /// When the queue is full the oldest pending chunk is dropped. Fails once
    /// the stdin thread has seen a write error or the input was closed.
    pub fn send(&self, data: Bytes) -> EncoderResult<()> {
        if let Some(reason) = self.input.pipe_error.lock().clone() {
            return Err(EncoderError::PipeWrite(io::Error::new(
                ErrorKind::BrokenPipe,
                reason,
            )));
        }
        let Some(input_tx) = self.input.input_tx.as_ref() else {
            return Err(EncoderError::PipeClosed);
        };

        let mut data = data;
        loop {
            match input_tx.try_send(data) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(rejected)) => {
                    if self.input.evict_rx.try_recv().is_ok() {
                        self.input.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    data = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return Err(EncoderError::PipeClosed),
            }
        }
    }

    /// (written, dropped) chunk counts of the stdin queue.
    pub fn input_counts(&self) -> (u64, u64) {
        (
            self.input.written.load(Ordering::Relaxed),
            self.input.dropped.load(Ordering::Relaxed),
        )
    }

    /// Stop accepting input. Queued chunks are still written, then stdin closes.
    pub fn close_input(&mut self) {
        self.input.input_tx = None;
    }

    /// Exit code if the process has exited. `Some(None)` means killed by a signal.
    pub fn exit_code(&mut self) -> Option<Option<i32>> {
        if self.exit.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit = Some(status.code());
            }
        }
        self.exit
    }

    /// Returns true while the process is running.
    pub fn is_running(&mut self) -> bool {
        self.exit_code().is_none()
    }

    /// Operating-system process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// The most recent line classified as an error.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// The most recent progress snapshot.
    pub fn progress(&self) -> Option<EncoderProgress> {
        self.state.lock().progress.clone()
    }

    /// Recent classified diagnostics, oldest first.
    pub fn recent_diagnostics(&self) -> Vec<Diagnostic> {
        self.state.lock().recent.iter().cloned().collect()
    }

    /// Number of (error, warning) lines seen so far.
    pub fn diagnostic_counts(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.errors, state.warnings)
    }

    /// Close stdin, wait up to `grace` for a clean exit, then kill.
    ///
    /// Returns the exit code. Safe to call more than once. A stdin thread
    /// stuck on a full pipe is released by the exit or the kill.
    #[instrument(name = "encoder_shutdown", skip(self), fields(label = self.label))]
    pub fn shutdown(&mut self, grace: Duration) -> Option<i32> {
        self.close_input();

        let deadline = Instant::now() + grace;
        while self.exit_code().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }

        if self.exit_code().is_none() {
            debug!("Encoder still running after {:?}, killing", grace);
            if let Err(e) = self.child.kill() {
                if e.kind() != ErrorKind::InvalidInput {
                    warn!("Failed to kill encoder: {}", e);
                }
            }
            match self.child.wait() {
                Ok(status) => self.exit = Some(status.code()),
                Err(e) => {
                    warn!("Failed to reap encoder: {}", e);
                    self.exit = Some(None);
                }
            }
        }

        self.join_threads();
        let code = self.exit.flatten();
        debug!(?code, "Encoder exited");
        code
    }

    /// Best description of why the process failed.
    pub fn failure_detail(&self) -> String {
        let state = self.state.lock();
        state
            .last_error
            .clone()
            .or_else(|| state.recent.back().map(|d| d.message.clone()))
            .unwrap_or_else(|| "no diagnostic output".to_string())
    }

    fn join_threads(&mut self) {
        if let Some(handle) = self.input.writer_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.watcher_thread.take() {
            let _ = handle.join();
        }

        let dropped = self.dropped_lines.load(Ordering::Relaxed);
        if dropped > 0 {
            debug!(label = self.label, dropped, "Encoder diagnostic lines dropped");
        }
        let (written, dropped) = self.input_counts();
        debug!(label = self.label, written, dropped, "Encoder input closed");
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        if self.exit.is_none() || self.watcher_thread.is_some() {
            self.shutdown(Duration::ZERO);
        }
    }
}

type ThreadHandles = (Option<JoinHandle<()>>, JoinHandle<()>);

fn spawn_input(label: &'static str, stdin: Option<ChildStdin>) -> EncoderResult<InputQueue> {
    let (input_tx, input_rx) = crossbeam_channel::bounded(INPUT_QUEUE_CAPACITY);
    let pipe_error = Arc::new(Mutex::new(None));
    let written = Arc::new(AtomicU64::new(0));

    let writer_thread = match stdin {
        Some(stdin) => {
            let queue = input_rx.clone();
            let pipe_error = Arc::clone(&pipe_error);
            let written = Arc::clone(&written);
            Some(
                thread::Builder::new()
                    .name(format!("{label}-stdin"))
                    .spawn(move || write_input(label, stdin, queue, pipe_error, written))
                    .map_err(|e| EncoderError::Launch(format!("stdin writer: {e}")))?,
            )
        }
        None => {
            *pipe_error.lock() = Some("stdin is not piped".to_string());
            None
        }
    };

    Ok(InputQueue {
        input_tx: Some(input_tx),
        evict_rx: input_rx,
        pipe_error,
        written,
        dropped: Arc::new(AtomicU64::new(0)),
        writer_thread,
    })
}

/// Write queued chunks until the queue closes or a write fails.
fn write_input(
    label: &'static str,
    mut stdin: ChildStdin,
    queue: Receiver<Bytes>,
    pipe_error: Arc<Mutex<Option<String>>>,
    written: Arc<AtomicU64>,
) {
    for chunk in queue.iter() {
        if let Err(e) = stdin.write_all(&chunk) {
            debug!(label, "Encoder stdin write failed: {}", e);
            *pipe_error.lock() = Some(e.to_string());
            return;
        }
        written.fetch_add(1, Ordering::Relaxed);
    }
    // Dropping stdin signals end of input.
    trace!(label, "Encoder stdin closed");
}

fn spawn_threads(
    label: &'static str,
    stderr: Option<ChildStderr>,
    state: Arc<Mutex<WatchState>>,
    dropped_lines: Arc<AtomicU64>,
    should_stop: Arc<AtomicBool>,
) -> EncoderResult<ThreadHandles> {
    let (line_tx, line_rx) = crossbeam_channel::bounded(DIAGNOSTIC_CHANNEL_CAPACITY);

    let reader = match stderr {
        Some(stderr) => Some(
            thread::Builder::new()
                .name(format!("{label}-stderr"))
                .spawn(move || read_lines(stderr, line_tx, dropped_lines))
                .map_err(|e| EncoderError::Launch(format!("stderr reader: {e}")))?,
        ),
        None => None,
    };

    let watcher = thread::Builder::new()
        .name(format!("{label}-watch"))
        .spawn(move || watch(label, line_rx, state, should_stop))
        .map_err(|e| EncoderError::Launch(format!("diagnostic watcher: {e}")))?;

    Ok((reader, watcher))
}

/// Split stderr on `\n` and `\r`; progress lines end with a bare carriage return.
fn read_lines(mut stderr: ChildStderr, line_tx: Sender<String>, dropped: Arc<AtomicU64>) {
    let mut buf = [0u8; 4096];
    let mut line = Vec::new();

    let send = |line: &mut Vec<u8>| {
        if line.is_empty() {
            return true;
        }
        let text = String::from_utf8_lossy(line).trim().to_string();
        line.clear();
        if text.is_empty() {
            return true;
        }
        match line_tx.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    };

    loop {
        let n = match stderr.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &byte in &buf[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !send(&mut line) {
                    return;
                }
            } else {
                line.push(byte);
            }
        }
    }
    send(&mut line);
}

fn watch(
    label: &'static str,
    line_rx: Receiver<String>,
    state: Arc<Mutex<WatchState>>,
    should_stop: Arc<AtomicBool>,
) {
    let mut last_progress_log: Option<Instant> = None;

    loop {
        match line_rx.recv_timeout(WATCH_POLL) {
            Ok(line) => handle_line(label, &line, &state, &mut last_progress_log),
            Err(RecvTimeoutError::Timeout) => {
                if should_stop.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    trace!(label, "Diagnostic watcher exiting");
}

fn handle_line(
    label: &'static str,
    line: &str,
    state: &Mutex<WatchState>,
    last_progress_log: &mut Option<Instant>,
) {
    if let Some(progress) = EncoderProgress::parse(line) {
        let due = last_progress_log.map_or(true, |at| at.elapsed() >= PROGRESS_LOG_INTERVAL);
        if due {
            info!(
                encoder = label,
                frame = ?progress.frame,
                fps = ?progress.fps,
                time = progress.time.as_deref().unwrap_or("??"),
                bitrate = progress.bitrate.as_deref().unwrap_or("N/A"),
                speed = progress.speed.as_deref().unwrap_or("??"),
                "Encoder progress"
            );
            *last_progress_log = Some(Instant::now());
        }
        state.lock().progress = Some(progress);
        return;
    }

    let level = classify_line(line);
    match level {
        DiagnosticLevel::Error => error!(encoder = label, "{}", line),
        DiagnosticLevel::Warning => warn!(encoder = label, "{}", line),
        DiagnosticLevel::Info => debug!(encoder = label, "{}", line),
    }

    let mut state = state.lock();
    match level {
        DiagnosticLevel::Error => {
            state.errors += 1;
            state.last_error = Some(line.to_string());
        }
        DiagnosticLevel::Warning => state.warnings += 1,
        DiagnosticLevel::Info => {}
    }
    if state.recent.len() == RECENT_DIAGNOSTICS {
        state.recent.pop_front();
    }
    state.recent.push_back(Diagnostic {
        level,
        message: line.to_string(),
    });
}
