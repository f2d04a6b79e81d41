//! # SABER Protocol Engine
//!
//! Core synchronization and playback engine for distributing an audio stream
//! from a broadcast source (UCB) across a mesh of repeaters to sink devices,
//! keeping playback on all sinks aligned within a tight jitter tolerance.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           SABER NODE                                  │
//! │                                                                       │
//! │   wire bytes (from external transport)                                │
//! │        │                                                              │
//! │        ▼                                                              │
//! │  ┌───────────┐    ┌───────────┐    ┌──────────────────────────────┐  │
//! │  │ MeshCrypto│───▶│ MeshPacket│───▶│        MeshNetwork            │  │
//! │  │ (decrypt/ │    │ (decode)  │    │  node registry + dispatch     │  │
//! │  │  verify)  │    └───────────┘    │  worker                       │  │
//! │  └───────────┘                     └──────┬──────────┬────────────┘  │
//! │                                           │          │               │
//! │                              TimeBeacon / │          │ Ping / Status │
//! │                              EmergencySync│          │               │
//! │                                           ▼          ▼               │
//! │                                    ┌────────────┐  node state        │
//! │                                    │ SyncManager│                    │
//! │                                    │ (master-   │                    │
//! │                                    │  time      │                    │
//! │                                    │  offset)   │                    │
//! │                                    └─────┬──────┘                    │
//! │                                          │ now()                     │
//! │   audio frames (timestamped)             ▼                           │
//! │        │                          ┌─────────────┐                    │
//! │        └─────────────────────────▶│ SyncEngine  │                    │
//! │                                   │ AudioBuffer │──▶ device callback │
//! │                                   │ skip/silence│    (cpal output)   │
//! │                                   └─────────────┘                    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`protocol::SaberProtocol`] facade is the single construction entry
//! point: it owns one instance of every subsystem and wires them per role
//! (Master / Repeater / Sink).

pub mod audio;
pub mod crypto;
pub mod error;
pub mod mesh;
pub mod protocol;
pub mod sync;

pub use error::{AudioError, CryptoError, Error, MeshError, Result};
pub use protocol::{SaberConfig, SaberProtocol};

/// Protocol-wide constants
pub mod constants {
    /// Sample rate for music-grade streams
    pub const DEFAULT_SAMPLE_RATE_MUSIC: u32 = 48_000;

    /// Sample rate for voice streams
    pub const DEFAULT_SAMPLE_RATE_VOICE: u32 = 16_000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u8 = 2;

    /// Initial playback buffer in milliseconds
    pub const INITIAL_BUFFER_MS: u32 = 20;

    /// Hard ceiling on the playback buffer in milliseconds
    pub const MAX_BUFFER_MS: u32 = 40;

    /// Maximum tolerated deviation from master time in milliseconds
    pub const MAX_JITTER_MS: u32 = 5;

    /// A node is considered active if it pinged within this window
    pub const NODE_ACTIVE_WINDOW_SECS: u64 = 30;

    /// Detached Ed25519 signature length in bytes
    pub const TOKEN_SIGNATURE_LEN: usize = 64;

    /// AES-GCM nonce length in bytes
    pub const NONCE_LEN: usize = 12;

    /// AES-GCM authentication tag length in bytes
    pub const TAG_LEN: usize = 16;

    /// Mesh worker wakes up at least this often
    pub const MESH_QUEUE_TIMEOUT_MS: u64 = 100;

    /// Protocol housekeeping tick interval
    pub const TICKER_INTERVAL_MS: u64 = 100;
}
