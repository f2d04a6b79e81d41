//! Presentation-timed audio sample store
//!
//! Holds interleaved f32 samples tagged with the master-clock time of the
//! oldest buffered frame. Reads resample against the caller's clock: frames
//! scheduled in the future produce silence, frames the clock has passed are
//! skipped so playback catches up.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::audio::ring::RingBuffer;
use crate::error::{Error, Result};

struct BufferState {
    ring: RingBuffer<f32>,
    /// Presentation time (ms) of the oldest buffered frame. Only meaningful
    /// while the ring is non-empty.
    head_timestamp: u64,
    buffer_ms: u32,
}

/// Timestamped audio buffer shared between the network ingest thread
/// (writer) and the device callback (reader).
pub struct AudioBuffer {
    sample_rate: u32,
    channels: u8,
    samples_per_ms: u64,
    state: Mutex<BufferState>,
    /// Mirrors the ring occupancy in samples for lock-free fill queries.
    occupancy: AtomicUsize,
    capacity: AtomicUsize,
    latency_ms: AtomicU32,
}

impl AudioBuffer {
    /// Create a buffer for `buffer_ms` of interleaved audio.
    pub fn new(sample_rate: u32, channels: u8, buffer_ms: u32) -> Result<Self> {
        if sample_rate == 0 || channels == 0 || buffer_ms == 0 {
            return Err(Error::InvalidArgument(
                "sample rate, channels and buffer size must be non-zero".into(),
            ));
        }

        let samples_per_ms = (sample_rate / 1000) as u64;
        let capacity = samples_per_ms as usize * buffer_ms as usize * channels as usize;
        let ring = RingBuffer::new(capacity)?;

        Ok(Self {
            sample_rate,
            channels,
            samples_per_ms,
            state: Mutex::new(BufferState {
                ring,
                head_timestamp: 0,
                buffer_ms,
            }),
            occupancy: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
            latency_ms: AtomicU32::new(0),
        })
    }

    /// Deposit `frames` interleaved frames stamped with presentation time
    /// `timestamp` (ms). Returns the number of frames actually stored;
    /// excess is dropped when the ring is full.
    pub fn write_samples(&self, samples: &[f32], frames: usize, timestamp: u64) -> usize {
        let want = frames * self.channels as usize;
        let src = &samples[..want.min(samples.len())];

        let mut state = self.state.lock().unwrap();

        if state.ring.is_empty() {
            state.head_timestamp = timestamp;
        }

        let written = state.ring.write(src);
        self.publish_occupancy(&state);

        written / self.channels as usize
    }

    /// Fill `out` with up to `frames` frames due at `now_ms`.
    ///
    /// Ahead of schedule: emits silence and consumes nothing, keeping the
    /// device fed. Behind schedule: discards the frames the clock has passed
    /// before reading. Returns the number of frames produced from the ring
    /// (0 for the silence case is never returned; silence reports `frames`).
    pub fn read_samples(&self, out: &mut [f32], frames: usize, now_ms: u64) -> usize {
        let channels = self.channels as usize;
        let want = (frames * channels).min(out.len());

        let mut state = self.state.lock().unwrap();

        if state.ring.is_empty() {
            return 0;
        }

        let delta = now_ms as i64 - state.head_timestamp as i64;

        // Early: these frames are scheduled in the future. Keep the device
        // alive with silence and leave the buffer untouched.
        if delta < 0 {
            out[..want].fill(0.0);
            return frames;
        }

        // Late: drop the frames whose presentation time has already passed.
        if delta > 0 {
            let available_frames = state.ring.len() / channels;
            let skip_frames =
                (delta as u64 * self.samples_per_ms).min(available_frames as u64) as usize;
            if skip_frames > 0 {
                state.ring.discard(skip_frames * channels);
                state.head_timestamp += skip_frames as u64 / self.samples_per_ms;
            }
        }

        let read = state.ring.read(&mut out[..want]);
        let frames_read = read / channels;
        state.head_timestamp += frames_read as u64 / self.samples_per_ms;

        self.publish_occupancy(&state);

        frames_read
    }

    /// Rebuild the ring at `buffer_ms`, preserving buffered contents.
    pub fn set_buffer_size_ms(&self, buffer_ms: u32) -> Result<()> {
        if buffer_ms == 0 {
            return Err(Error::InvalidArgument(
                "buffer size must be greater than zero".into(),
            ));
        }

        let mut state = self.state.lock().unwrap();

        let capacity =
            self.samples_per_ms as usize * buffer_ms as usize * self.channels as usize;
        let new_ring = RingBuffer::new(capacity)?;

        let pending = state.ring.len();
        if pending > 0 {
            let mut carried = vec![0.0f32; pending];
            let read = state.ring.read(&mut carried);
            new_ring.write(&carried[..read]);
        }

        state.ring = new_ring;
        state.buffer_ms = buffer_ms;
        self.capacity.store(capacity, Ordering::Release);
        self.publish_occupancy(&state);

        Ok(())
    }

    /// Drop all buffered audio.
    pub fn clear(&self) {
        let state = self.state.lock().unwrap();
        state.ring.clear();
        self.publish_occupancy(&state);
    }

    /// Buffered audio in milliseconds. Lock-free.
    pub fn latency_ms(&self) -> u32 {
        self.latency_ms.load(Ordering::Acquire)
    }

    /// Fill level as a percentage (0-100). Lock-free.
    pub fn fill_level(&self) -> u8 {
        let capacity = self.capacity.load(Ordering::Acquire);
        let occupancy = self.occupancy.load(Ordering::Acquire);
        ((occupancy * 100) / capacity.max(1)) as u8
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn buffer_ms(&self) -> u32 {
        self.state.lock().unwrap().buffer_ms
    }

    fn publish_occupancy(&self, state: &BufferState) {
        let occupancy = state.ring.len();
        self.occupancy.store(occupancy, Ordering::Release);
        let frames = occupancy / self.channels as usize;
        self.latency_ms
            .store((frames as u64 / self.samples_per_ms) as u32, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_48k(buffer_ms: u32) -> AudioBuffer {
        AudioBuffer::new(48_000, 2, buffer_ms).unwrap()
    }

    fn ramp(frames: usize, channels: usize) -> Vec<f32> {
        (0..frames * channels).map(|i| i as f32).collect()
    }

    #[test]
    fn test_invalid_construction() {
        assert!(AudioBuffer::new(0, 2, 20).is_err());
        assert!(AudioBuffer::new(48_000, 0, 20).is_err());
        assert!(AudioBuffer::new(48_000, 2, 0).is_err());
    }

    #[test]
    fn test_round_trip_on_time() {
        let buffer = stereo_48k(20);
        let samples = ramp(480, 2);

        assert_eq!(buffer.write_samples(&samples, 480, 1000), 480);

        let mut out = vec![0.0f32; 960];
        assert_eq!(buffer.read_samples(&mut out, 480, 1000), 480);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_silence_when_early() {
        let buffer = stereo_48k(20);
        let samples = vec![0.5f32; 960];
        buffer.write_samples(&samples, 480, 1000);

        let mut out = vec![1.0f32; 960];
        // Clock has not reached the stream yet: silence, nothing consumed
        assert_eq!(buffer.read_samples(&mut out, 480, 900), 480);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(buffer.latency_ms(), 10);

        // Once the clock catches up the original samples are still there
        let mut real = vec![0.0f32; 960];
        assert_eq!(buffer.read_samples(&mut real, 480, 1000), 480);
        assert_eq!(real, samples);
    }

    #[test]
    fn test_skip_when_late() {
        let buffer = stereo_48k(40);
        let samples = ramp(960, 2);
        buffer.write_samples(&samples, 960, 1000);

        // 10 ms late at 48 kHz: the first 480 frames are stale
        let mut out = vec![0.0f32; 960];
        assert_eq!(buffer.read_samples(&mut out, 480, 1010), 480);
        assert_eq!(out, samples[960..]);

        // Head timestamp advanced past the skipped and returned frames
        assert!(buffer.latency_ms() == 0);
        let mut empty = vec![0.0f32; 960];
        assert_eq!(buffer.read_samples(&mut empty, 480, 1020), 0);
    }

    #[test]
    fn test_skip_advances_head_timestamp() {
        let buffer = stereo_48k(40);
        buffer.write_samples(&ramp(960, 2), 960, 1000);

        // Skip 10 ms then consume 5 ms: head lands at 1015
        let mut out = vec![0.0f32; 480];
        assert_eq!(buffer.read_samples(&mut out, 240, 1010), 240);

        // A read exactly at 1015 returns the next contiguous frames
        let expected = ramp(960, 2)[(480 + 240) * 2..(480 + 240 + 240) * 2].to_vec();
        let mut next = vec![0.0f32; 480];
        assert_eq!(buffer.read_samples(&mut next, 240, 1015), 240);
        assert_eq!(next, expected);
    }

    #[test]
    fn test_empty_read_returns_zero() {
        let buffer = stereo_48k(20);
        let mut out = vec![0.0f32; 64];
        assert_eq!(buffer.read_samples(&mut out, 32, 1000), 0);
    }

    #[test]
    fn test_write_clips_when_full() {
        // 1 ms of stereo at 48 kHz = 96 samples
        let buffer = stereo_48k(1);
        let written = buffer.write_samples(&vec![0.1f32; 960], 480, 1000);
        assert_eq!(written, 48);
        assert_eq!(buffer.fill_level(), 100);
    }

    #[test]
    fn test_resize_preserves_contents() {
        let buffer = stereo_48k(10);
        let samples = ramp(240, 2);
        buffer.write_samples(&samples, 240, 1000);

        buffer.set_buffer_size_ms(40).unwrap();
        assert_eq!(buffer.buffer_ms(), 40);

        let mut out = vec![0.0f32; 480];
        assert_eq!(buffer.read_samples(&mut out, 240, 1000), 240);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_resize_zero_rejected() {
        let buffer = stereo_48k(20);
        assert!(buffer.set_buffer_size_ms(0).is_err());
    }

    #[test]
    fn test_latency_tracks_occupancy() {
        let buffer = stereo_48k(40);
        assert_eq!(buffer.latency_ms(), 0);

        buffer.write_samples(&vec![0.0f32; 960], 480, 0);
        assert_eq!(buffer.latency_ms(), 10);

        buffer.clear();
        assert_eq!(buffer.latency_ms(), 0);
    }
}
