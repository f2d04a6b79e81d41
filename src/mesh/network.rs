//! Mesh node registry and packet dispatch
//!
//! One worker thread drains the packet queue, applies node-state updates
//! and hands every packet to the registered handler. Two locks: the queue
//! (with its condition variable) and the registry. Lock order is queue
//! first, then registry; they are never held together.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::constants::MESH_QUEUE_TIMEOUT_MS;
use crate::mesh::node::{Node, NodeRole};
use crate::mesh::packet::MeshPacket;

/// Sink for every packet the worker processes.
pub type PacketHandler = Arc<dyn Fn(&MeshPacket) + Send + Sync>;

struct Registry {
    nodes: HashMap<String, Node>,
    handler: Option<PacketHandler>,
}

/// The local view of the mesh: known nodes plus the dispatch worker.
pub struct MeshNetwork {
    local_id: String,
    registry: Arc<Mutex<Registry>>,
    queue: Arc<(Mutex<VecDeque<MeshPacket>>, Condvar)>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MeshNetwork {
    /// Create a network around `local_node`; the local node starts out
    /// registered.
    pub fn new(local_node: Node) -> Self {
        let local_id = local_node.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(local_id.clone(), local_node);

        Self {
            local_id,
            registry: Arc::new(Mutex::new(Registry {
                nodes,
                handler: None,
            })),
            queue: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Spawn the dispatch worker. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = self.registry.clone();
        let queue = self.queue.clone();
        let running = self.running.clone();

        let spawned = std::thread::Builder::new()
            .name("saber-mesh".to_string())
            .spawn(move || {
                tracing::debug!("mesh worker started");
                while running.load(Ordering::SeqCst) {
                    let batch: Vec<MeshPacket> = {
                        let (lock, condvar) = &*queue;
                        let mut pending = lock.lock().unwrap();
                        if pending.is_empty() {
                            let (guard, _) = condvar
                                .wait_timeout(pending, Duration::from_millis(MESH_QUEUE_TIMEOUT_MS))
                                .unwrap();
                            pending = guard;
                        }
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        pending.drain(..).collect()
                    };

                    for packet in &batch {
                        Self::process_packet(&registry, packet);
                    }
                }
                tracing::debug!("mesh worker stopped");
            });

        match spawned {
            Ok(handle) => *self.worker.lock().unwrap() = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                tracing::error!("failed to spawn mesh worker: {}", e);
            }
        }
    }

    /// Stop the worker cooperatively and join it.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let (_, condvar) = &*self.queue;
        condvar.notify_all();

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Enqueue a packet for the worker.
    pub fn send_packet(&self, packet: MeshPacket) {
        let (lock, condvar) = &*self.queue;
        lock.lock().unwrap().push_back(packet);
        condvar.notify_one();
    }

    /// Register a node if it is not already known.
    pub fn register_node(&self, node_id: &str, role: NodeRole) {
        let mut registry = self.registry.lock().unwrap();
        registry
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| Node::new(node_id, role));
    }

    /// Apply a status report; a node reporting status is alive.
    pub fn update_node_status(&self, node_id: &str, buffer_state: u8, latency_ms: u32) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(node) = registry.nodes.get_mut(node_id) {
            node.update_buffer_state(buffer_state);
            node.set_latency(latency_ms);
            node.update_ping();
        }
    }

    /// Ids of all nodes heard from within the liveness window.
    pub fn get_active_nodes(&self) -> Vec<String> {
        let registry = self.registry.lock().unwrap();
        registry
            .nodes
            .values()
            .filter(|n| n.is_active())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Snapshot of a single node.
    pub fn get_node(&self, node_id: &str) -> Option<Node> {
        self.registry.lock().unwrap().nodes.get(node_id).cloned()
    }

    /// Install the sink for all processed packets.
    pub fn set_packet_handler(&self, handler: PacketHandler) {
        self.registry.lock().unwrap().handler = Some(handler);
    }

    fn process_packet(registry: &Arc<Mutex<Registry>>, packet: &MeshPacket) {
        // Apply state updates under the registry lock, then release it
        // before invoking the handler.
        let handler = {
            let mut reg = registry.lock().unwrap();
            match packet {
                MeshPacket::Ping { source, .. } => {
                    if let Some(node) = reg.nodes.get_mut(source) {
                        node.update_ping();
                    }
                }
                MeshPacket::Status {
                    node_id,
                    buffer,
                    latency,
                } => {
                    if let Some(node) = reg.nodes.get_mut(node_id) {
                        node.update_buffer_state(*buffer);
                        node.set_latency(*latency);
                        node.update_ping();
                    }
                }
                _ => {}
            }
            reg.handler.clone()
        };

        if let Some(handler) = handler {
            // A panicking handler must not take the worker down
            if catch_unwind(AssertUnwindSafe(|| handler(packet))).is_err() {
                tracing::error!(kind = packet.kind(), "packet handler panicked");
            }
        }
    }
}

impl Drop for MeshNetwork {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn network() -> MeshNetwork {
        MeshNetwork::new(Node::new("local", NodeRole::Master))
    }

    #[test]
    fn test_local_node_registered() {
        let net = network();
        assert!(net.get_node("local").is_some());
        // Not yet heard from, so not active
        assert!(net.get_active_nodes().is_empty());
    }

    #[test]
    fn test_register_is_insert_if_absent() {
        let net = network();
        net.register_node("sink-1", NodeRole::Sink);
        net.update_node_status("sink-1", 40, 12);

        // Re-registering must not reset the node's state
        net.register_node("sink-1", NodeRole::Sink);
        let node = net.get_node("sink-1").unwrap();
        assert_eq!(node.buffer_state(), 40);
        assert_eq!(node.latency_ms(), 12);
    }

    #[test]
    fn test_status_implies_liveness() {
        let net = network();
        net.register_node("sink-1", NodeRole::Sink);
        assert!(net.get_active_nodes().is_empty());

        net.update_node_status("sink-1", 80, 5);
        assert_eq!(net.get_active_nodes(), ["sink-1".to_string()]);
    }

    #[test]
    fn test_start_stop_idempotent() {
        let net = network();
        net.start();
        net.start();
        assert!(net.is_running());
        net.stop();
        assert!(!net.is_running());
        net.stop();
    }

    #[test]
    fn test_ping_dispatch_updates_liveness() {
        let net = network();
        net.register_node("sink-2", NodeRole::Sink);
        net.start();

        net.send_packet(MeshPacket::ping("sink-2", 1000));
        assert!(wait_until(1000, || {
            net.get_active_nodes().contains(&"sink-2".to_string())
        }));

        net.stop();
    }

    #[test]
    fn test_status_dispatch_updates_node() {
        let net = network();
        net.register_node("sink-2", NodeRole::Sink);
        net.start();

        net.send_packet(MeshPacket::status("sink-2", 66, 21));
        assert!(wait_until(1000, || {
            net.get_node("sink-2")
                .map(|n| n.buffer_state() == 66 && n.latency_ms() == 21)
                .unwrap_or(false)
        }));

        net.stop();
    }

    #[test]
    fn test_handler_receives_packets_in_order() {
        let net = network();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        net.set_packet_handler(Arc::new(move |packet| {
            if let Ok(master_time) = packet.time_beacon_data() {
                sink.lock().unwrap().push(master_time);
            }
        }));
        net.start();

        for t in 0..20u64 {
            net.send_packet(MeshPacket::time_beacon(t));
        }

        assert!(wait_until(1000, || seen.lock().unwrap().len() == 20));
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());

        net.stop();
    }

    #[test]
    fn test_handler_panic_does_not_kill_worker() {
        let net = network();
        let seen: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        net.set_packet_handler(Arc::new(move |packet| {
            let master_time = packet.time_beacon_data().unwrap_or(0);
            if master_time == 1 {
                panic!("boom");
            }
            sink.lock().unwrap().push(master_time);
        }));
        net.start();

        net.send_packet(MeshPacket::time_beacon(1));
        net.send_packet(MeshPacket::time_beacon(2));

        assert!(wait_until(1000, || seen.lock().unwrap().contains(&2)));
        net.stop();
    }
}
