//! Error types for the SABER protocol engine

use thiserror::Error;

/// Main error type for the protocol engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Mesh error: {0}")]
    Mesh(#[from] MeshError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Engine not initialized")]
    NotInitialized,

    #[error("No output device available")]
    NoDevice,

    #[error("Device error: {0}")]
    Device(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Cryptographic envelope errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Signing failed: {0}")]
    Signature(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    #[error("Hashing failed: {0}")]
    Hash(String),
}

/// Mesh networking errors
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Wrong packet type: expected {expected}, got {actual}")]
    WrongPacketType {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Packet encoding failed: {0}")]
    Encode(String),

    #[error("Packet decoding failed: {0}")]
    Decode(String),

    #[error("Network not running")]
    NotRunning,
}

/// Result type alias for the protocol engine
pub type Result<T> = std::result::Result<T, Error>;
