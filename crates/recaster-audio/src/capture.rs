//! Live audio capture.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use recaster_ipc::{AudioDeviceInfo, AudioSelection};
use tracing::{debug, info, instrument};

use crate::buffer::{AudioBuffer, AudioChunk};
use crate::device::{resolve_selection, ResolvedInput};
use crate::error::AudioError;
use crate::{AudioResult, BLOCK_FRAMES, INPUT_GAIN};

/// Negotiated sample format of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Format of the silence generator.
    pub const SILENCE: AudioFormat = AudioFormat {
        sample_rate: 44_100,
        channels: 2,
    };

    /// Wall-clock length of `frames` sample frames.
    pub fn duration_of(&self, frames: usize) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Convert float samples to 16-bit with the fixed input gain and hard clipping.
pub fn convert_block(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * 32767.0 * INPUT_GAIN).clamp(-32768.0, 32767.0) as i16)
        .collect()
}

/// Regroups arbitrarily sized callback buffers into fixed-size blocks.
#[derive(Debug)]
pub struct BlockAssembler {
    pending: Vec<i16>,
    block_len: usize,
}

impl BlockAssembler {
    /// Assemble blocks of `frames` frames with `channels` interleaved channels.
    pub fn new(frames: usize, channels: u16) -> Self {
        let block_len = frames * channels.max(1) as usize;
        Self {
            pending: Vec::with_capacity(block_len),
            block_len,
        }
    }

    /// Append samples, calling `emit` for every completed block.
    pub fn push(&mut self, samples: &[i16], mut emit: impl FnMut(Vec<i16>)) {
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.block_len - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.block_len {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_len));
                emit(block);
            }
        }
    }

    /// Discard a partially assembled block.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Samples waiting for the current block to fill.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// A running audio input feeding an [`AudioBuffer`].
///
/// Chunks reach the buffer only while forwarding is enabled; otherwise they
/// are discarded so an unconsumed buffer never grows.
pub struct AudioCapture {
    source: String,
    format: AudioFormat,
    buffer: AudioBuffer,
    forwarding: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Open the input described by `selection`.
    #[instrument(name = "audio_capture_open", skip(devices, buffer))]
    pub fn open(
        selection: AudioSelection,
        devices: &[AudioDeviceInfo],
        buffer: AudioBuffer,
    ) -> AudioResult<Self> {
        match resolve_selection(selection, devices)? {
            ResolvedInput::Silence => Self::silence(buffer),
            ResolvedInput::Device(info) => Self::device(&info, buffer),
        }
    }

    /// Start the silence generator.
    pub fn silence(buffer: AudioBuffer) -> AudioResult<Self> {
        let format = AudioFormat::SILENCE;
        let forwarding = Arc::new(AtomicBool::new(false));
        let should_stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let buffer = buffer.clone();
            let forwarding = Arc::clone(&forwarding);
            let should_stop = Arc::clone(&should_stop);
            thread::Builder::new()
                .name("audio-silence".to_string())
                .spawn(move || silence_loop(format, buffer, forwarding, should_stop))
                .map_err(|e| AudioError::Thread(e.to_string()))?
        };

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Silence generator started"
        );
        Ok(Self {
            source: "silence".to_string(),
            format,
            buffer,
            forwarding,
            should_stop,
            worker: Some(worker),
        })
    }

    /// Open a device input stream.
    #[cfg(feature = "device-audio")]
    pub fn device(info: &AudioDeviceInfo, buffer: AudioBuffer) -> AudioResult<Self> {
        let forwarding = Arc::new(AtomicBool::new(false));
        let should_stop = Arc::new(AtomicBool::new(false));
        let (format, worker) = native::spawn_stream(
            info.clone(),
            buffer.clone(),
            Arc::clone(&forwarding),
            Arc::clone(&should_stop),
        )?;

        info!(
            device = %info.name,
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio input started"
        );
        Ok(Self {
            source: info.name.clone(),
            format,
            buffer,
            forwarding,
            should_stop,
            worker: Some(worker),
        })
    }

    /// Open a device input stream.
    #[cfg(not(feature = "device-audio"))]
    pub fn device(info: &AudioDeviceInfo, buffer: AudioBuffer) -> AudioResult<Self> {
        let _ = buffer;
        Err(AudioError::NotSupported(format!(
            "device '{}' requires the `device-audio` feature",
            info.name
        )))
    }

    /// Sample rate and channel count of every chunk this capture produces.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Buffer the capture pushes into.
    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Display name of the input.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns true for the silence generator.
    pub fn is_silence(&self) -> bool {
        self.source == "silence"
    }

    /// Enable or disable pushing chunks into the buffer.
    pub fn set_forwarding(&self, enabled: bool) {
        let was = self.forwarding.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            debug!(source = %self.source, enabled, "Audio forwarding changed");
        }
    }

    /// Whether chunks are currently pushed into the buffer.
    pub fn is_forwarding(&self) -> bool {
        self.forwarding.load(Ordering::SeqCst)
    }

    /// Stop the input. Chunks already queued stay in the buffer.
    #[instrument(name = "audio_capture_stop", skip(self), fields(source = %self.source))]
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.forwarding.store(false, Ordering::SeqCst);
        self.should_stop.store(true, Ordering::SeqCst);
        let _ = worker.join();
        info!("Audio input stopped");
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn silence_loop(
    format: AudioFormat,
    buffer: AudioBuffer,
    forwarding: Arc<AtomicBool>,
    should_stop: Arc<AtomicBool>,
) {
    let block = format.duration_of(BLOCK_FRAMES);
    let samples = BLOCK_FRAMES * format.channels as usize;
    let mut sequence = 0u64;
    let mut next_block_time = Instant::now() + block;

    while !should_stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < next_block_time {
            thread::sleep((next_block_time - now).min(Duration::from_millis(10)));
            continue;
        }

        if forwarding.load(Ordering::SeqCst) {
            buffer.push(AudioChunk::new(
                vec![0; samples],
                format.channels,
                format.sample_rate,
                sequence,
            ));
            sequence += 1;
        }
        next_block_time += block;
    }

    debug!(chunks = sequence, "Silence generator exiting");
}

#[cfg(feature = "device-audio")]
mod native {
    use super::*;

    use cpal::traits::{DeviceTrait, StreamTrait};
    use cpal::{BufferSize, SampleFormat, StreamConfig};
    use tracing::{error, warn};

    use crate::device::native::open_device;

    /// Per-stream state moved into the cpal callback.
    struct InputSink {
        assembler: BlockAssembler,
        format: AudioFormat,
        buffer: AudioBuffer,
        forwarding: Arc<AtomicBool>,
        sequence: u64,
    }

    impl InputSink {
        fn accept(&mut self, data: &[f32]) {
            if !self.forwarding.load(Ordering::Relaxed) {
                self.assembler.clear();
                return;
            }

            let converted = convert_block(data);
            let (buffer, format, sequence) = (&self.buffer, self.format, &mut self.sequence);
            self.assembler.push(&converted, |block| {
                buffer.push(AudioChunk::new(
                    block,
                    format.channels,
                    format.sample_rate,
                    *sequence,
                ));
                *sequence += 1;
            });
        }
    }

    pub(super) fn spawn_stream(
        info: AudioDeviceInfo,
        buffer: AudioBuffer,
        forwarding: Arc<AtomicBool>,
        should_stop: Arc<AtomicBool>,
    ) -> AudioResult<(AudioFormat, JoinHandle<()>)> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("audio-input".to_string())
            .spawn(move || {
                // cpal streams are not Send on every host, so the stream lives here.
                let stream = match build_stream(&info, buffer, forwarding) {
                    Ok((format, stream)) => {
                        let _ = ready_tx.send(Ok(format));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !should_stop.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(10));
                }

                if let Err(e) = stream.pause() {
                    debug!("Failed to pause input stream: {}", e);
                }
                drop(stream);
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(format)) => Ok((format, handle)),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Thread("audio input thread exited".to_string()))
            }
        }
    }

    fn build_stream(
        info: &AudioDeviceInfo,
        buffer: AudioBuffer,
        forwarding: Arc<AtomicBool>,
    ) -> AudioResult<(AudioFormat, cpal::Stream)> {
        let device = open_device(info)?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceUnavailable(format!("{}: {e}", info.name)))?;

        let format = AudioFormat {
            sample_rate: supported.sample_rate().0,
            channels: supported.channels().clamp(1, 2),
        };
        let sample_format = supported.sample_format();

        let fixed = StreamConfig {
            channels: format.channels,
            sample_rate: supported.sample_rate(),
            buffer_size: BufferSize::Fixed(BLOCK_FRAMES as u32),
        };

        let stream = match open_stream(&device, &fixed, sample_format, format, &buffer, &forwarding)
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(device = %info.name, "Fixed buffer size rejected ({}), using device default", e);
                let fallback = StreamConfig {
                    buffer_size: BufferSize::Default,
                    ..fixed
                };
                open_stream(&device, &fallback, sample_format, format, &buffer, &forwarding)?
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::DeviceUnavailable(format!("{}: {e}", info.name)))?;
        Ok((format, stream))
    }

    fn open_stream(
        device: &cpal::Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        format: AudioFormat,
        buffer: &AudioBuffer,
        forwarding: &Arc<AtomicBool>,
    ) -> AudioResult<cpal::Stream> {
        let mut sink = InputSink {
            assembler: BlockAssembler::new(BLOCK_FRAMES, format.channels),
            format,
            buffer: buffer.clone(),
            forwarding: Arc::clone(forwarding),
            sequence: 0,
        };
        let err_fn = |err: cpal::StreamError| error!("Audio input stream error: {}", err);

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| sink.accept(data),
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    sink.accept(&floats);
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    sink.accept(&floats);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(AudioError::FormatNotSupported(format!("{other:?}")));
            }
        };

        stream.map_err(|e| AudioError::DeviceUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_block_gain_and_clipping() {
        let out = convert_block(&[0.0, 0.5, -0.5, 1.0, -1.0]);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], (0.5 * 32767.0 * 1.5) as i16);
        assert_eq!(out[2], (-0.5 * 32767.0 * 1.5) as i16);
        assert_eq!(out[3], i16::MAX);
        assert_eq!(out[4], i16::MIN);
    }

    #[test]
    fn test_block_assembler_regroups() {
        let mut assembler = BlockAssembler::new(4, 2);
        let mut blocks = Vec::new();

        assembler.push(&[1; 5], |b| blocks.push(b));
        assert!(blocks.is_empty());
        assembler.push(&[2; 14], |b| blocks.push(b));

        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.len() == 8));
        assert_eq!(&blocks[0][..], &[1, 1, 1, 1, 1, 2, 2, 2]);
        assert_eq!(assembler.pending_len(), 3);

        assembler.clear();
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_silence_respects_forwarding_gate() {
        let buffer = AudioBuffer::new(64);
        let mut capture = AudioCapture::silence(buffer.clone()).unwrap();
        assert_eq!(capture.format(), AudioFormat::SILENCE);
        assert!(capture.is_silence());

        thread::sleep(Duration::from_millis(80));
        assert!(buffer.is_empty());

        capture.set_forwarding(true);
        thread::sleep(Duration::from_millis(120));
        capture.set_forwarding(false);

        let chunk = buffer.try_pop().expect("silence chunk");
        assert_eq!(chunk.samples.len(), BLOCK_FRAMES * 2);
        assert!(chunk.samples.iter().all(|&s| s == 0));
        assert_eq!((chunk.channels, chunk.sample_rate), (2, 44_100));

        capture.stop();
        let queued = buffer.len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.len(), queued);
    }

    #[test]
    fn test_open_resolves_silence() {
        let devices = vec![AudioDeviceInfo::silence()];
        let capture =
            AudioCapture::open(AudioSelection::Silence, &devices, AudioBuffer::new(4)).unwrap();
        assert!(capture.is_silence());

        assert!(matches!(
            AudioCapture::open(AudioSelection::Auto, &devices, AudioBuffer::new(4)),
            Err(AudioError::NoLoopbackDevice)
        ));
    }
}
