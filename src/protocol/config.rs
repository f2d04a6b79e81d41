//! Node configuration

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_SAMPLE_RATE_MUSIC, DEFAULT_SAMPLE_RATE_VOICE};
use crate::mesh::NodeRole;

/// Configuration for a SABER node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaberConfig {
    /// Unique node identifier within the mesh
    pub node_id: String,
    pub role: NodeRole,
    /// Transport address hint, opaque to the engine
    pub bt_address: Option<String>,
    /// Music mode streams 48 kHz stereo; voice mode 16 kHz mono
    pub is_music_mode: bool,
}

impl SaberConfig {
    pub fn new(node_id: impl Into<String>, role: NodeRole, is_music_mode: bool) -> Self {
        Self {
            node_id: node_id.into(),
            role,
            bt_address: None,
            is_music_mode,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        if self.is_music_mode {
            DEFAULT_SAMPLE_RATE_MUSIC
        } else {
            DEFAULT_SAMPLE_RATE_VOICE
        }
    }

    pub fn channels(&self) -> u8 {
        if self.is_music_mode {
            2
        } else {
            1
        }
    }
}

impl Default for SaberConfig {
    fn default() -> Self {
        Self {
            node_id: format!("node-{:06x}", rand::random::<u32>() & 0xFF_FFFF),
            role: NodeRole::Sink,
            bt_address: None,
            is_music_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_generates_node_id() {
        let a = SaberConfig::default();
        let b = SaberConfig::default();
        assert!(a.node_id.starts_with("node-"));
        assert_ne!(a.node_id, b.node_id);
        assert_eq!(a.role, NodeRole::Sink);
        assert!(a.is_music_mode);
    }

    #[test]
    fn test_mode_selects_format() {
        let music = SaberConfig::new("m", NodeRole::Sink, true);
        assert_eq!(music.sample_rate(), 48_000);
        assert_eq!(music.channels(), 2);

        let voice = SaberConfig::new("v", NodeRole::Sink, false);
        assert_eq!(voice.sample_rate(), 16_000);
        assert_eq!(voice.channels(), 1);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = SaberConfig::new("sink-1", NodeRole::Repeater, false);
        let json = serde_json::to_string(&config).unwrap();
        let back: SaberConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_id, "sink-1");
        assert_eq!(back.role, NodeRole::Repeater);
        assert!(!back.is_music_mode);
    }
}
