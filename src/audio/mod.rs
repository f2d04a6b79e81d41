//! Audio subsystem module

pub mod buffer;
pub mod engine;
pub mod ring;
pub mod stream;

pub use buffer::AudioBuffer;
pub use engine::{EngineState, SyncEngine, TimeProvider};
pub use ring::RingBuffer;
pub use stream::AudioStream;
