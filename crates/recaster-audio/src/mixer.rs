//! Background-track mixing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};
use parking_lot::RwLock;
use recaster_ipc::MixRatio;
use tracing::{debug, info, instrument, warn};

use crate::buffer::{AudioBuffer, AudioChunk};
use crate::capture::AudioFormat;
use crate::error::AudioError;
use crate::{AudioResult, BLOCK_FRAMES};

/// How long the live-mode loop waits for a chunk before rechecking its stop flag.
const LIVE_POLL: Duration = Duration::from_millis(10);

/// A fully decoded background track that loops forever.
#[derive(Debug, Clone)]
pub struct BackgroundTrack {
    samples: Vec<i16>,
    channels: u16,
    sample_rate: u32,
    position: usize,
}

impl BackgroundTrack {
    /// Wrap already decoded interleaved samples.
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate,
            position: 0,
        }
    }

    /// Decode a 16-bit integer or 32-bit float WAV file.
    ///
    /// Other files fail with [`AudioError::FormatNotSupported`] so the caller
    /// can transcode them first.
    pub fn from_wav(path: &Path) -> AudioResult<Self> {
        let reader = WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(io) => AudioError::Io(io),
            other => AudioError::FormatNotSupported(format!("{}: {other}", path.display())),
        })?;
        let spec = reader.spec();

        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader.into_samples::<i16>().collect::<Result<Vec<_>, _>>()?,
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .map(|s| s.map(|s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16))
                .collect::<Result<Vec<_>, _>>()?,
            (format, bits) => {
                return Err(AudioError::FormatNotSupported(format!(
                    "{}: {bits}-bit {format:?} samples",
                    path.display()
                )))
            }
        };

        debug!(
            path = %path.display(),
            channels = spec.channels,
            sample_rate = spec.sample_rate,
            frames = samples.len() / spec.channels.max(1) as usize,
            "Decoded background track"
        );
        Ok(Self::new(samples, spec.channels, spec.sample_rate))
    }

    /// Apply a gain in decibels with hard clipping.
    pub fn with_gain_db(mut self, gain_db: f32) -> Self {
        if gain_db != 0.0 {
            let factor = 10f32.powf(gain_db / 20.0);
            for sample in &mut self.samples {
                *sample = (*sample as f32 * factor).round().clamp(-32768.0, 32767.0) as i16;
            }
        }
        self
    }

    /// Convert to `target` channels. Mono is duplicated, stereo-to-mono is averaged.
    pub fn to_channels(self, target: u16) -> Self {
        let target = target.max(1);
        if target == self.channels {
            return self;
        }

        let source = self.channels as usize;
        let mut samples = Vec::with_capacity(self.samples.len() / source * target as usize);
        for frame in self.samples.chunks_exact(source) {
            if target == 1 {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                samples.push((sum / source as i32) as i16);
            } else {
                for channel in 0..target as usize {
                    samples.push(frame[channel.min(source - 1)]);
                }
            }
        }

        Self {
            samples,
            channels: target,
            sample_rate: self.sample_rate,
            position: 0,
        }
    }

    /// Read the next `frames` frames, wrapping to the start when exhausted.
    pub fn next_block(&mut self, frames: usize) -> Vec<i16> {
        let wanted = frames * self.channels as usize;
        if self.samples.is_empty() {
            return vec![0; wanted];
        }

        let mut block = Vec::with_capacity(wanted);
        while block.len() < wanted {
            if self.position >= self.samples.len() {
                self.position = 0;
            }
            let take = (wanted - block.len()).min(self.samples.len() - self.position);
            block.extend_from_slice(&self.samples[self.position..self.position + take]);
            self.position += take;
        }
        block
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length of the track in sample frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }
}

/// Blend a live chunk with a background block.
///
/// The output has the live chunk's length; the background is zero-padded or
/// truncated to match. Each sample is `live * ratio.live + bg * ratio.background`
/// clipped to the 16-bit range and truncated toward zero.
pub fn blend(live: &[i16], background: &[i16], ratio: MixRatio) -> Vec<i16> {
    live.iter()
        .enumerate()
        .map(|(i, &l)| {
            let b = background.get(i).copied().unwrap_or(0);
            (l as f32 * ratio.live + b as f32 * ratio.background).clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// What the mixer blends the background into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixMode {
    /// No live input: background blocks are pushed as-is at real-time pace.
    Silence,

    /// Each live chunk is blended with the next background block.
    Live,
}

/// Blends a looping background track into an audio stream on its own thread.
pub struct BackgroundMixer {
    mode: MixMode,
    ratio: Arc<RwLock<MixRatio>>,
    should_stop: Arc<AtomicBool>,
    mix_thread: Option<JoinHandle<()>>,
}

impl BackgroundMixer {
    /// Start mixing. Reads from `live` and writes to `output`, which must be
    /// different buffers.
    #[instrument(name = "mixer_start", skip(track, live, output))]
    pub fn start(
        track: BackgroundTrack,
        mode: MixMode,
        live: AudioBuffer,
        output: AudioBuffer,
        format: AudioFormat,
        ratio: MixRatio,
    ) -> AudioResult<Self> {
        if track.sample_rate() != format.sample_rate {
            warn!(
                track_rate = track.sample_rate(),
                session_rate = format.sample_rate,
                "Background track sample rate differs from capture; it will play at the wrong speed"
            );
        }
        let track = track.to_channels(format.channels);

        let ratio = Arc::new(RwLock::new(ratio));
        let should_stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let ratio = Arc::clone(&ratio);
            let should_stop = Arc::clone(&should_stop);
            thread::Builder::new()
                .name("audio-mixer".to_string())
                .spawn(move || match mode {
                    MixMode::Silence => silence_mix(track, live, output, format, should_stop),
                    MixMode::Live => live_mix(track, live, output, ratio, should_stop),
                })
                .map_err(|e| AudioError::Thread(e.to_string()))?
        };

        info!(?mode, "Background mixer started");
        Ok(Self {
            mode,
            ratio,
            should_stop,
            mix_thread: Some(handle),
        })
    }

    pub fn mode(&self) -> MixMode {
        self.mode
    }

    /// Change the blend weights of a running mixer.
    pub fn set_ratio(&self, ratio: MixRatio) {
        *self.ratio.write() = ratio;
    }

    /// Stop the mixer and join its thread.
    #[instrument(name = "mixer_stop", skip(self))]
    pub fn stop(&mut self) {
        let Some(handle) = self.mix_thread.take() else {
            return;
        };
        self.should_stop.store(true, Ordering::SeqCst);
        let _ = handle.join();
        info!("Background mixer stopped");
    }
}

impl Drop for BackgroundMixer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn silence_mix(
    mut track: BackgroundTrack,
    live: AudioBuffer,
    output: AudioBuffer,
    format: AudioFormat,
    should_stop: Arc<AtomicBool>,
) {
    let block = format.duration_of(BLOCK_FRAMES);
    let mut sequence = 0u64;
    let mut next_block_time = Instant::now();

    while !should_stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < next_block_time {
            thread::sleep((next_block_time - now).min(LIVE_POLL));
            continue;
        }

        // Silence chunks carry nothing to blend.
        live.clear();

        output.push(AudioChunk::new(
            track.next_block(BLOCK_FRAMES),
            track.channels(),
            format.sample_rate,
            sequence,
        ));
        sequence += 1;
        next_block_time += block;
    }

    debug!(chunks = sequence, "Silence mixer exiting");
}

fn live_mix(
    mut track: BackgroundTrack,
    live: AudioBuffer,
    output: AudioBuffer,
    ratio: Arc<RwLock<MixRatio>>,
    should_stop: Arc<AtomicBool>,
) {
    let mut mixed = 0u64;

    while !should_stop.load(Ordering::SeqCst) {
        let Some(chunk) = live.pop_timeout(LIVE_POLL) else {
            continue;
        };

        let background = track.next_block(BLOCK_FRAMES);
        let samples = blend(&chunk.samples, &background, *ratio.read());
        output.push(AudioChunk {
            samples,
            channels: chunk.channels,
            sample_rate: chunk.sample_rate,
            captured_at: chunk.captured_at,
            sequence: chunk.sequence,
        });
        mixed += 1;
    }

    debug!(chunks = mixed, "Live mixer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(v: f32) -> i16 {
        v.clamp(-32768.0, 32767.0) as i16
    }

    #[test]
    fn test_blend_equal_length() {
        let live = [1000i16, -1000, 32767, -32768, 7];
        let bg = [2000i16, 500, 32767, -32768, -3];
        let ratio = MixRatio::default();

        let mixed = blend(&live, &bg, ratio);
        for i in 0..live.len() {
            assert_eq!(mixed[i], clip(0.7 * live[i] as f32 + 0.3 * bg[i] as f32));
        }
        assert!((1299..=1300).contains(&mixed[0]));
    }

    #[test]
    fn test_blend_pads_and_truncates_background() {
        let ratio = MixRatio::default();

        let full = clip(0.7 * 1000.0 + 0.3 * 1000.0);
        let padded = clip(0.7 * 1000.0);

        let mixed = blend(&[1000, 1000, 1000], &[1000], ratio);
        assert_eq!(mixed, vec![full, padded, padded]);

        let mixed = blend(&[1000], &[1000, 5000, 5000], ratio);
        assert_eq!(mixed, vec![full]);
    }

    #[test]
    fn test_track_loops() {
        let mut track = BackgroundTrack::new(vec![1, 2, 3, 4, 5, 6], 2, 44_100);
        assert_eq!(track.frames(), 3);
        assert_eq!(track.next_block(2), vec![1, 2, 3, 4]);
        assert_eq!(track.next_block(2), vec![5, 6, 1, 2]);
        assert_eq!(track.next_block(4), vec![3, 4, 5, 6, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_track_yields_silence() {
        let mut track = BackgroundTrack::new(Vec::new(), 2, 44_100);
        assert_eq!(track.next_block(3), vec![0; 6]);
    }

    #[test]
    fn test_channel_conversion() {
        let mono = BackgroundTrack::new(vec![10, -20], 1, 44_100).to_channels(2);
        assert_eq!(mono.channels(), 2);
        assert_eq!(mono.samples, vec![10, 10, -20, -20]);

        let stereo = BackgroundTrack::new(vec![10, 20, -4, -8], 2, 44_100).to_channels(1);
        assert_eq!(stereo.samples, vec![15, -6]);
    }

    #[test]
    fn test_gain_clips() {
        let track = BackgroundTrack::new(vec![1000, -1000, 20000], 1, 44_100).with_gain_db(10.0);
        assert_eq!(track.samples[0], 3162);
        assert_eq!(track.samples[1], -3162);
        assert_eq!(track.samples[2], i16::MAX);
    }

    #[test]
    fn test_from_wav_reads_pcm16() {
        let path = std::env::temp_dir().join(format!("recaster-bg-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [1i16, 2, 3] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let track = BackgroundTrack::from_wav(&path).unwrap();
        assert_eq!((track.channels(), track.sample_rate(), track.frames()), (1, 22_050, 3));
        std::fs::remove_file(&path).unwrap();

        let not_wav = std::env::temp_dir().join(format!("recaster-bg-{}.mp3", std::process::id()));
        std::fs::write(&not_wav, b"ID3 definitely not a wav").unwrap();
        assert!(matches!(
            BackgroundTrack::from_wav(&not_wav),
            Err(AudioError::FormatNotSupported(_))
        ));
        std::fs::remove_file(&not_wav).unwrap();
    }

    #[test]
    fn test_live_mixer_blends_into_output() {
        let live = AudioBuffer::new(16);
        let output = AudioBuffer::new(16);
        let track = BackgroundTrack::new(vec![1000; BLOCK_FRAMES], 1, 44_100);
        let format = AudioFormat::SILENCE;

        let mut mixer = BackgroundMixer::start(
            track,
            MixMode::Live,
            live.clone(),
            output.clone(),
            format,
            MixRatio::default(),
        )
        .unwrap();

        live.push(AudioChunk::new(vec![1000; BLOCK_FRAMES * 2], 2, 44_100, 9));
        let mixed = output.pop_timeout(Duration::from_secs(1)).expect("mixed chunk");
        mixer.stop();

        assert_eq!(mixed.sequence, 9);
        assert_eq!(mixed.samples.len(), BLOCK_FRAMES * 2);
        let expected = clip(0.7 * 1000.0 + 0.3 * 1000.0);
        assert!(mixed.samples.iter().all(|&s| s == expected));
        assert!(live.is_empty());
    }

    #[test]
    fn test_silence_mixer_paces_background() {
        let live = AudioBuffer::new(16);
        let output = AudioBuffer::new(64);
        let track = BackgroundTrack::new(vec![5; 16], 1, 44_100);

        let mut mixer = BackgroundMixer::start(
            track,
            MixMode::Silence,
            live,
            output.clone(),
            AudioFormat::SILENCE,
            MixRatio::default(),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(240));
        mixer.stop();

        // About ten 23 ms blocks in 240 ms.
        let produced = output.len();
        assert!((5..=15).contains(&produced), "produced {produced} blocks");
        let chunk = output.try_pop().unwrap();
        assert_eq!(chunk.channels, 2);
        assert!(chunk.samples.iter().all(|&s| s == 5));
    }
}
