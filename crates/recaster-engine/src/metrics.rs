//! Streaming performance sampling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{Pid, System};
use tracing::{debug, warn};

use recaster_ipc::{PerformanceReport, WarningType};

/// How often the engine samples while streaming.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Frame timestamps kept for the jitter estimate.
const JITTER_WINDOW: usize = 30;

/// Allowed deviation from the target frame rate.
const FPS_TOLERANCE: f32 = 2.0;

/// Below this frame rate the warning carries suggestions.
const LOW_FPS: f32 = 25.0;

const CPU_WARN_PERCENT: f32 = 80.0;
const JITTER_WARN_MS: f64 = 20.0;

/// Observes the video tick and the encoder process. Never alters either.
pub struct PerformanceMonitor {
    target_fps: f32,
    frame_count: AtomicU64,
    frame_times: Mutex<VecDeque<Instant>>,
    cycle_start: Mutex<Instant>,
    system: Mutex<System>,
}

impl PerformanceMonitor {
    /// Create a monitor for the given target frame rate.
    pub fn new(target_fps: f32) -> Self {
        Self {
            target_fps,
            frame_count: AtomicU64::new(0),
            frame_times: Mutex::new(VecDeque::with_capacity(JITTER_WINDOW)),
            cycle_start: Mutex::new(Instant::now()),
            system: Mutex::new(System::new()),
        }
    }

    /// Start a fresh measurement, e.g. when a stream starts.
    pub fn reset(&self) {
        self.frame_count.store(0, Ordering::Relaxed);
        self.frame_times.lock().clear();
        *self.cycle_start.lock() = Instant::now();
        // CPU usage is a delta between refreshes; prime the baseline.
        self.system.lock().refresh_cpu();
    }

    /// Record a frame delivered by the tick.
    pub fn record_frame(&self) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
        let mut times = self.frame_times.lock();
        if times.len() == JITTER_WINDOW {
            times.pop_front();
        }
        times.push_back(Instant::now());
    }

    /// Standard deviation of recent frame intervals, in milliseconds.
    pub fn jitter_ms(&self) -> Option<f64> {
        let times = self.frame_times.lock();
        let intervals: Vec<f64> = times
            .iter()
            .zip(times.iter().skip(1))
            .map(|(a, b)| b.duration_since(*a).as_secs_f64() * 1000.0)
            .collect();
        interval_std_dev(&intervals)
    }

    /// Close the current cycle and report on it.
    ///
    /// The frame counter restarts with every call.
    pub fn sample(&self, encoder_pid: Option<u32>) -> PerformanceReport {
        let now = Instant::now();
        let elapsed = {
            let mut start = self.cycle_start.lock();
            let elapsed = now.duration_since(*start);
            *start = now;
            elapsed
        };
        let frames = self.frame_count.swap(0, Ordering::Relaxed);
        let fps = if elapsed.as_secs_f32() > 0.0 {
            frames as f32 / elapsed.as_secs_f32()
        } else {
            0.0
        };

        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();
        let system_cpu_percent = system.global_cpu_info().cpu_usage();

        let (encoder_cpu_percent, encoder_memory_percent) = match encoder_pid {
            Some(pid) => {
                let pid = Pid::from_u32(pid);
                if system.refresh_process(pid) {
                    let total = system.total_memory();
                    match system.process(pid) {
                        Some(process) => (
                            Some(process.cpu_usage()),
                            (total > 0).then(|| process.memory() as f32 / total as f32 * 100.0),
                        ),
                        None => (None, None),
                    }
                } else {
                    (None, None)
                }
            }
            None => (None, None),
        };
        drop(system);

        let report = PerformanceReport {
            fps,
            target_fps: self.target_fps,
            encoder_cpu_percent,
            encoder_memory_percent,
            system_cpu_percent,
            jitter_ms: self.jitter_ms(),
        };
        debug!(
            fps = report.fps,
            cpu = report.system_cpu_percent,
            jitter_ms = ?report.jitter_ms,
            "Performance sample"
        );
        report
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(recaster_ipc::TARGET_FPS as f32)
    }
}

/// Warnings raised by a report.
pub fn check_warnings(report: &PerformanceReport) -> Vec<WarningType> {
    let mut warnings = Vec::new();

    if (report.fps - report.target_fps).abs() > FPS_TOLERANCE {
        warn!(fps = report.fps, target = report.target_fps, "Frame rate off target");
        warnings.push(WarningType::FrameRateDeviation {
            fps: report.fps,
            target_fps: report.target_fps,
            suggestions: optimization_suggestions(report.fps),
        });
    }

    if report.system_cpu_percent > CPU_WARN_PERCENT {
        warn!(percent = report.system_cpu_percent, "High CPU usage");
        warnings.push(WarningType::HighCpuUsage {
            percent: report.system_cpu_percent,
        });
    }

    if let Some(jitter_ms) = report.jitter_ms.filter(|j| *j > JITTER_WARN_MS) {
        warn!(jitter_ms, "Unstable frame intervals");
        warnings.push(WarningType::FrameJitter { jitter_ms });
    }

    warnings
}

/// Hints for the operator when the frame rate is low.
pub fn optimization_suggestions(fps: f32) -> Vec<String> {
    if fps >= LOW_FPS {
        return Vec::new();
    }
    vec![
        "Lower the capture resolution or select a smaller region".to_string(),
        "Close other programs running in the background".to_string(),
        "Check CPU load and temperature".to_string(),
    ]
}

fn interval_std_dev(intervals: &[f64]) -> Option<f64> {
    if intervals.len() < 2 {
        return None;
    }
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}
