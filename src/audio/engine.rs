//! Sync engine: binds the playback buffer to the audio device
//!
//! Drives the device callback against the master-synchronized clock and
//! owns the stream lifecycle. States move strictly forward:
//! `Created → Initialized → Running → Stopped`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::stream::AudioStream;
use crate::constants::INITIAL_BUFFER_MS;
use crate::error::{AudioError, Result};

/// Supplies master-synchronized milliseconds to the device callback.
///
/// Contract: must be lock-free and non-blocking — it is invoked from the
/// audio driver's real-time thread.
pub type TimeProvider = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Engine lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Initialized,
    Running,
    Stopped,
}

/// Playback engine for a sink node.
pub struct SyncEngine {
    sample_rate: u32,
    channels: u8,
    state: EngineState,
    stream: Option<AudioStream>,
    is_synchronized: AtomicBool,
    time_offset_ms: AtomicI64,
}

impl SyncEngine {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
            state: EngineState::Created,
            stream: None,
            is_synchronized: AtomicBool::new(false),
            time_offset_ms: AtomicI64::new(0),
        }
    }

    /// Open the audio stream with the initial buffer, wiring the device
    /// callback to `time_provider`.
    ///
    /// A device failure is fatal: the engine transitions to `Stopped` and
    /// the error is surfaced.
    pub fn initialize(&mut self, time_provider: TimeProvider) -> Result<()> {
        if self.state != EngineState::Created {
            return Err(crate::error::Error::InvalidArgument(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }

        match AudioStream::new(
            self.sample_rate,
            self.channels,
            INITIAL_BUFFER_MS,
            time_provider,
        ) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = EngineState::Initialized;
                tracing::info!(
                    sample_rate = self.sample_rate,
                    channels = self.channels,
                    "sync engine initialized"
                );
                Ok(())
            }
            Err(e) => {
                self.state = EngineState::Stopped;
                Err(e)
            }
        }
    }

    /// Resize to the optimal buffer, pre-fill for half of it, then enable
    /// the device callback. Not instant: sleeps `optimal_buffer_ms / 2`.
    pub fn start(&mut self, optimal_buffer_ms: u32) -> Result<()> {
        if self.state != EngineState::Initialized {
            return Err(AudioError::NotInitialized.into());
        }

        self.stream
            .as_ref()
            .ok_or(AudioError::NotInitialized)?
            .set_buffer_size(optimal_buffer_ms)?;

        // Let the network ingest half-fill the buffer before playback
        thread::sleep(Duration::from_millis(u64::from(optimal_buffer_ms / 2)));

        if let Some(e) = self.stream.as_ref().and_then(|s| s.check_errors()) {
            self.stream = None;
            self.state = EngineState::Stopped;
            return Err(e.into());
        }

        if let Some(stream) = &self.stream {
            stream.start();
        }
        self.state = EngineState::Running;
        tracing::info!(optimal_buffer_ms, "sync engine running");
        Ok(())
    }

    /// Disable the callback and close the stream. Terminal.
    pub fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        if self.state != EngineState::Stopped {
            self.state = EngineState::Stopped;
            tracing::info!("sync engine stopped");
        }
    }

    /// Ingress: forward timestamped frames to the playback buffer.
    pub fn write_audio_data(&self, samples: &[f32], frames: usize, timestamp: u64) -> Result<usize> {
        let stream = self.stream.as_ref().ok_or(AudioError::NotInitialized)?;
        Ok(stream.write_audio(samples, frames, timestamp))
    }

    /// Record the sync status reported by the protocol layer.
    pub fn update_sync_state(&self, is_synced: bool, time_offset_ms: i64) {
        self.is_synchronized.store(is_synced, Ordering::SeqCst);
        self.time_offset_ms.store(time_offset_ms, Ordering::SeqCst);
        if is_synced {
            tracing::debug!(time_offset_ms, "engine sync state updated");
        } else {
            tracing::warn!("engine lost synchronization");
        }
    }

    /// Software plus hardware latency in ms; 0 before initialization.
    pub fn get_current_latency(&self) -> u32 {
        self.stream.as_ref().map_or(0, |s| s.current_latency())
    }

    /// Playback buffer fill level (0-100); 0 before initialization.
    pub fn get_buffer_level(&self) -> u8 {
        self.stream.as_ref().map_or(0, |s| s.buffer_level())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == EngineState::Running
    }

    pub fn is_synchronized(&self) -> bool {
        self.is_synchronized.load(Ordering::SeqCst)
    }

    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms.load(Ordering::SeqCst)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
