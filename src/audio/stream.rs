//! Synchronized audio output stream
//!
//! Owns a cpal output stream on a dedicated thread. The device callback
//! pulls presentation-timed samples from the shared [`AudioBuffer`] against
//! the master-synchronized clock supplied by the time provider; inactive
//! streams and shortfalls degrade to silence, never to an aborted stream.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioBuffer;
use crate::audio::engine::TimeProvider;
use crate::error::{AudioError, Result};

/// How long `stop` waits for in-flight audio to drain before closing.
const DRAIN_WAIT_MS: u64 = 100;

/// Output stream bound to the default device, fed from an [`AudioBuffer`].
pub struct AudioStream {
    buffer: Arc<AudioBuffer>,
    /// Callback produces audio only while set; otherwise pure silence.
    active: Arc<AtomicBool>,
    /// Keeps the stream-owning thread alive.
    running: Arc<AtomicBool>,
    /// Device-side latency estimate, derived from the negotiated callback
    /// buffer size (ms).
    hw_latency_ms: Arc<AtomicU32>,
    error_rx: Receiver<AudioError>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioStream {
    /// Open the default output device at `sample_rate`/`channels` with a
    /// `buffer_ms` software buffer. The stream starts silent; call
    /// [`AudioStream::start`] to begin producing audio.
    pub fn new(
        sample_rate: u32,
        channels: u8,
        buffer_ms: u32,
        time_provider: TimeProvider,
    ) -> Result<Self> {
        let buffer = Arc::new(AudioBuffer::new(sample_rate, channels, buffer_ms)?);

        let active = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let hw_latency_ms = Arc::new(AtomicU32::new(0));

        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let cb_buffer = buffer.clone();
        let cb_active = active.clone();
        let cb_hw_latency = hw_latency_ms.clone();
        let cb_time = time_provider.clone();
        let thread_running = running.clone();

        let handle = thread::Builder::new()
            .name("saber-playback".to_string())
            .spawn(move || {
                let config = StreamConfig {
                    channels: channels as u16,
                    sample_rate: SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let device = match cpal::default_host().default_output_device() {
                    Some(d) => d,
                    None => {
                        let _ = ready_tx.send(Err(AudioError::NoDevice));
                        return;
                    }
                };

                let channels_usize = channels as usize;
                let stream_error_tx = error_tx.clone();

                let stream = device.build_output_stream(
                    &config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let frames = out.len() / channels_usize;

                        // Track the device-side buffering for latency reports
                        cb_hw_latency.store(
                            ((frames as u64 * 1000) / sample_rate as u64) as u32,
                            Ordering::Relaxed,
                        );

                        if !cb_active.load(Ordering::Relaxed) {
                            out.fill(0.0);
                            return;
                        }

                        let now_ms = (cb_time)();
                        let read = cb_buffer.read_samples(out, frames, now_ms);

                        // Shortfall degrades to silence
                        if read < frames {
                            out[read * channels_usize..].fill(0.0);
                        }
                    },
                    move |err| {
                        let _ = stream_error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Device(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                tracing::info!(sample_rate, channels, "audio stream opened");

                // Keep the stream alive; it closes when this thread exits
                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        // Surface device-open failures synchronously
        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e.into());
            }
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                return Err(AudioError::Device("stream open timed out".into()).into());
            }
        }

        Ok(Self {
            buffer,
            active,
            running,
            hw_latency_ms,
            error_rx,
            thread_handle: Some(handle),
        })
    }

    /// Enable the device callback.
    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
        tracing::info!("audio stream started");
    }

    /// Disable the callback, wait for in-flight audio to drain, and close
    /// the stream.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(DRAIN_WAIT_MS));

        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        tracing::info!("audio stream stopped");
    }

    /// Forward timestamped frames into the playback buffer.
    pub fn write_audio(&self, samples: &[f32], frames: usize, timestamp: u64) -> usize {
        self.buffer.write_samples(samples, frames, timestamp)
    }

    /// Resize the software buffer.
    pub fn set_buffer_size(&self, buffer_ms: u32) -> Result<()> {
        self.buffer.set_buffer_size_ms(buffer_ms)
    }

    /// Software (ring occupancy) plus hardware (device) latency in ms.
    pub fn current_latency(&self) -> u32 {
        self.buffer.latency_ms() + self.hw_latency_ms.load(Ordering::Relaxed)
    }

    /// Software buffer fill level (0-100).
    pub fn buffer_level(&self) -> u8 {
        self.buffer.fill_level()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Drain one pending device error, if any.
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
