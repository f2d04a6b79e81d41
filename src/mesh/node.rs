//! Mesh node identity and liveness

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::constants::NODE_ACTIVE_WINDOW_SECS;

/// Role a node plays in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// UCB — the broadcast source emitting the stream and the clock
    Master,
    /// Intermediate relay extending the mesh
    Repeater,
    /// Terminal device that plays the stream
    Sink,
}

/// A participant in the mesh, as seen from the local node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub role: NodeRole,
    /// When this node was last heard from.
    pub(crate) last_ping: Option<Instant>,
    latency_ms: u32,
    /// Reported playback buffer fill (0-100).
    buffer_state: u8,
}

impl Node {
    pub fn new(id: impl Into<String>, role: NodeRole) -> Self {
        Self {
            id: id.into(),
            role,
            last_ping: None,
            latency_ms: 0,
            buffer_state: 100,
        }
    }

    /// Record that the node was just heard from.
    pub fn update_ping(&mut self) {
        self.last_ping = Some(Instant::now());
    }

    pub fn update_buffer_state(&mut self, state: u8) {
        self.buffer_state = state;
    }

    pub fn set_latency(&mut self, latency_ms: u32) {
        self.latency_ms = latency_ms;
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    pub fn buffer_state(&self) -> u8 {
        self.buffer_state
    }

    /// Active iff heard from within the liveness window.
    pub fn is_active(&self) -> bool {
        match self.last_ping {
            Some(at) => at.elapsed() < Duration::from_secs(NODE_ACTIVE_WINDOW_SECS),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_inactive() {
        let node = Node::new("sink-1", NodeRole::Sink);
        assert_eq!(node.id, "sink-1");
        assert_eq!(node.role, NodeRole::Sink);
        assert!(!node.is_active());
        assert_eq!(node.buffer_state(), 100);
    }

    #[test]
    fn test_ping_activates() {
        let mut node = Node::new("sink-1", NodeRole::Sink);
        node.update_ping();
        assert!(node.is_active());
    }

    #[test]
    fn test_liveness_window_expires() {
        let mut node = Node::new("sink-1", NodeRole::Sink);
        node.update_ping();
        assert!(node.is_active());

        // Rewind the last ping past the 30 s window
        node.last_ping = Instant::now().checked_sub(Duration::from_secs(31));
        assert!(node.last_ping.is_some());
        assert!(!node.is_active());
    }

    #[test]
    fn test_status_fields() {
        let mut node = Node::new("r-1", NodeRole::Repeater);
        node.update_buffer_state(55);
        node.set_latency(17);
        assert_eq!(node.buffer_state(), 55);
        assert_eq!(node.latency_ms(), 17);
    }
}
