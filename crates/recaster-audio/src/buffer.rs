//! Bounded PCM chunk queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::trace;

use crate::AUDIO_BUFFER_CAPACITY;

/// A block of interleaved 16-bit PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Interleaved samples.
    pub samples: Vec<i16>,

    /// Number of interleaved channels.
    pub channels: u16,

    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// When the chunk was produced.
    pub captured_at: Instant,

    /// Monotonically increasing per-producer sequence number.
    pub sequence: u64,
}

impl AudioChunk {
    /// Create a chunk stamped with the current time.
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            captured_at: Instant::now(),
            sequence,
        }
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Multi-producer queue of audio chunks with drop-oldest overflow.
///
/// `push` never blocks: when the queue is full the oldest chunk is evicted
/// and counted in [`dropped`](Self::dropped). Clones share the same queue.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    sender: Sender<AudioChunk>,
    receiver: Receiver<AudioChunk>,
    dropped: Arc<AtomicU64>,
}

impl AudioBuffer {
    /// Create a buffer holding up to `capacity` chunks.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue a chunk, evicting the oldest one if the queue is full.
    pub fn push(&self, chunk: AudioChunk) {
        let mut chunk = chunk;
        loop {
            match self.sender.try_send(chunk) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if self.receiver.try_recv().is_ok() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        trace!(total, "Audio buffer full, evicted oldest chunk");
                    }
                    chunk = rejected;
                }
                // Both ends live in self, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Dequeue a chunk without waiting.
    pub fn try_pop(&self) -> Option<AudioChunk> {
        self.receiver.try_recv().ok()
    }

    /// Dequeue a chunk, waiting up to `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioChunk> {
        match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discard everything currently queued. Returns how many chunks were removed.
    pub fn clear(&self) -> usize {
        self.receiver.try_iter().count()
    }

    /// Number of queued chunks.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Total chunks evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(AUDIO_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn chunk(producer: i16, sequence: u64) -> AudioChunk {
        AudioChunk::new(vec![producer, producer], 2, 44_100, sequence)
    }

    #[test]
    fn test_fifo_and_frames() {
        let buffer = AudioBuffer::new(8);
        buffer.push(chunk(1, 0));
        buffer.push(chunk(1, 1));

        assert_eq!(buffer.len(), 2);
        let first = buffer.try_pop().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.frames(), 1);
        assert_eq!(buffer.try_pop().unwrap().sequence, 1);
        assert!(buffer.try_pop().is_none());
        assert!(buffer.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = AudioBuffer::new(3);
        for seq in 0..5 {
            buffer.push(chunk(0, seq));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        let remaining: Vec<u64> = std::iter::from_fn(|| buffer.try_pop())
            .map(|c| c.sequence)
            .collect();
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        const PER_PRODUCER: u64 = 500;
        let buffer = AudioBuffer::new(4096);

        let producers: Vec<_> = (0..2i16)
            .map(|id| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        buffer.push(chunk(id, seq));
                    }
                })
            })
            .collect();

        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut seen = vec![Vec::new(), Vec::new()];
                while seen.iter().map(Vec::len).sum::<usize>() < 2 * PER_PRODUCER as usize {
                    if let Some(c) = buffer.pop_timeout(Duration::from_millis(100)) {
                        seen[c.samples[0] as usize].push(c.sequence);
                    }
                }
                seen
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        let seen = consumer.join().unwrap();

        let expected: Vec<u64> = (0..PER_PRODUCER).collect();
        assert_eq!(seen[0], expected);
        assert_eq!(seen[1], expected);
        assert_eq!(buffer.dropped(), 0);
    }

    #[test]
    fn test_clear() {
        let buffer = AudioBuffer::new(4);
        buffer.push(chunk(0, 0));
        buffer.push(chunk(0, 1));
        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
    }
}
