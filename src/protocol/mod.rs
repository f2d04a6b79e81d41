//! Protocol facade
//!
//! [`SaberProtocol`] is the single construction entry point: it owns one
//! instance of every subsystem and wires them per role. Ownership is a
//! tree — subsystem callbacks close over the sync manager handle, never
//! over each other.

pub mod config;

pub use config::SaberConfig;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::engine::{SyncEngine, TimeProvider};
use crate::constants::TICKER_INTERVAL_MS;
use crate::crypto::MeshCrypto;
use crate::error::Result;
use crate::mesh::network::PacketHandler;
use crate::mesh::{MeshNetwork, MeshPacket, Node, NodeRole};
use crate::sync::SyncManager;

/// Housekeeping runs every tick; periodic traffic every this many ticks.
const TICKS_PER_ANNOUNCE: u64 = 10;

/// A SABER node: mesh registry, clock sync, crypto envelope and (on sinks)
/// the playback engine.
pub struct SaberProtocol {
    config: SaberConfig,
    sync: Arc<SyncManager>,
    mesh: Arc<MeshNetwork>,
    engine: Option<Arc<Mutex<SyncEngine>>>,
    crypto: Mutex<MeshCrypto>,
    user_handler: Arc<Mutex<Option<PacketHandler>>>,
    ticker_running: Arc<AtomicBool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl SaberProtocol {
    pub fn new(config: SaberConfig) -> Self {
        let local_node = Node::new(config.node_id.clone(), config.role);

        Self {
            config,
            sync: Arc::new(SyncManager::new()),
            mesh: Arc::new(MeshNetwork::new(local_node)),
            engine: None,
            crypto: Mutex::new(MeshCrypto::new()),
            user_handler: Arc::new(Mutex::new(None)),
            ticker_running: Arc::new(AtomicBool::new(false)),
            ticker: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Start the mesh, wire the packet handler, and (on sinks) open the
    /// playback engine. Returns `false` when a sink cannot open its audio
    /// device.
    pub fn initialize(&mut self) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return true;
        }

        tracing::info!(
            node_id = %self.config.node_id,
            role = ?self.config.role,
            "initializing SABER protocol"
        );

        self.mesh.start();

        if self.config.role == NodeRole::Sink {
            let mut engine = SyncEngine::new(self.config.sample_rate(), self.config.channels());

            let provider_sync = self.sync.clone();
            let time_provider: TimeProvider = Arc::new(move || provider_sync.now());

            if let Err(e) = engine.initialize(time_provider) {
                tracing::error!("sink audio engine failed to open: {}", e);
                self.mesh.stop();
                self.initialized.store(false, Ordering::SeqCst);
                return false;
            }

            self.engine = Some(Arc::new(Mutex::new(engine)));
        }

        self.install_mesh_handler();
        self.spawn_ticker();

        tracing::info!(node_id = %self.config.node_id, "SABER protocol initialized");
        true
    }

    /// Route sync-bearing packets into the sync manager and forward
    /// everything to the user handler.
    fn install_mesh_handler(&self) {
        let sync = self.sync.clone();
        let engine = self.engine.clone();
        let user_handler = self.user_handler.clone();
        let local_id = self.config.node_id.clone();

        let handler: PacketHandler = Arc::new(move |packet| {
            match packet {
                MeshPacket::TimeBeacon { master_time } => {
                    sync.handle_time_beacon(*master_time);
                    if let Some(engine) = &engine {
                        engine
                            .lock()
                            .unwrap()
                            .update_sync_state(true, sync.time_offset_ms());
                    }
                }
                MeshPacket::EmergencySync {
                    master_time,
                    targets,
                } => {
                    let addressed = targets.is_empty() || targets.iter().any(|t| t == &local_id);
                    if addressed {
                        sync.emergency_sync(*master_time);
                        if let Some(engine) = &engine {
                            engine
                                .lock()
                                .unwrap()
                                .update_sync_state(true, sync.time_offset_ms());
                        }
                    }
                }
                _ => {}
            }

            let user = user_handler.lock().unwrap().clone();
            if let Some(user) = user {
                user(packet);
            }
        });

        self.mesh.set_packet_handler(handler);
    }

    /// Periodic housekeeping: keep the local node alive, announce the
    /// master clock (masters) and report buffer health (sinks).
    fn spawn_ticker(&self) {
        self.ticker_running.store(true, Ordering::SeqCst);

        let running = self.ticker_running.clone();
        let mesh = self.mesh.clone();
        let sync = self.sync.clone();
        let engine = self.engine.clone();
        let role = self.config.role;
        let node_id = self.config.node_id.clone();

        let spawned = thread::Builder::new()
            .name("saber-ticker".to_string())
            .spawn(move || {
                let mut tick: u64 = 0;
                while running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(TICKER_INTERVAL_MS));
                    tick += 1;
                    if tick % TICKS_PER_ANNOUNCE != 0 {
                        continue;
                    }

                    mesh.send_packet(MeshPacket::ping(node_id.clone(), sync.now()));

                    match role {
                        NodeRole::Master => {
                            mesh.send_packet(MeshPacket::time_beacon(sync.now()));
                        }
                        NodeRole::Sink => {
                            if let Some(engine) = &engine {
                                let engine = engine.lock().unwrap();
                                if engine.is_active() {
                                    mesh.send_packet(MeshPacket::status(
                                        node_id.clone(),
                                        engine.get_buffer_level(),
                                        engine.get_current_latency(),
                                    ));
                                }
                            }
                        }
                        NodeRole::Repeater => {}
                    }
                }
            });

        match spawned {
            Ok(handle) => *self.ticker.lock().unwrap() = Some(handle),
            Err(e) => {
                self.ticker_running.store(false, Ordering::SeqCst);
                tracing::error!("failed to spawn protocol ticker: {}", e);
            }
        }
    }

    /// Begin synchronized playback on a sink. Refuses until the node has
    /// seen a time beacon; buffer size comes from the measured latencies.
    pub fn start_audio_playback(&self) -> bool {
        let Some(engine) = &self.engine else {
            tracing::warn!("start_audio_playback: node has no playback engine");
            return false;
        };

        if !self.sync.is_synchronized() {
            tracing::warn!("start_audio_playback: node is not synchronized");
            return false;
        }

        let optimal = self.sync.get_optimal_buffer_size();
        match engine.lock().unwrap().start(optimal) {
            Ok(()) => {
                tracing::info!(buffer_ms = optimal, "audio playback started");
                true
            }
            Err(e) => {
                tracing::error!("audio playback failed to start: {}", e);
                false
            }
        }
    }

    pub fn stop_audio_playback(&self) -> bool {
        let Some(engine) = &self.engine else {
            return false;
        };
        engine.lock().unwrap().stop();
        tracing::info!("audio playback stopped");
        true
    }

    /// Apply a master time directly (e.g. relayed outside the mesh queue).
    pub fn update_time_sync(&self, master_time_ms: u64) -> bool {
        let result = self.sync.handle_time_beacon(master_time_ms);
        if let Some(engine) = &self.engine {
            engine
                .lock()
                .unwrap()
                .update_sync_state(result, self.sync.time_offset_ms());
        }
        result
    }

    /// Ingress for decoded audio frames on a sink.
    pub fn write_audio_data(
        &self,
        samples: &[f32],
        frames: usize,
        source_timestamp: u64,
    ) -> Result<usize> {
        let engine = self
            .engine
            .as_ref()
            .ok_or(crate::error::AudioError::NotInitialized)?;
        engine
            .lock()
            .unwrap()
            .write_audio_data(samples, frames, source_timestamp)
    }

    /// End-to-end playback latency: engine (software + device) on a sink,
    /// otherwise the mesh latency average.
    pub fn get_current_latency(&self) -> u32 {
        match &self.engine {
            Some(engine) => engine.lock().unwrap().get_current_latency(),
            None => self.sync.get_average_latency().map_or(0, |avg| avg as u32),
        }
    }

    pub fn get_buffer_level(&self) -> u8 {
        self.engine
            .as_ref()
            .map_or(0, |e| e.lock().unwrap().get_buffer_level())
    }

    /// Add a node to the mesh registry. The address hint is opaque to the
    /// engine; the transport layer resolves it.
    pub fn register_node(&self, node_id: &str, role: NodeRole, address: Option<&str>) -> bool {
        self.mesh.register_node(node_id, role);
        tracing::debug!(node_id, ?role, ?address, "node registered");
        true
    }

    pub fn get_active_nodes(&self) -> Vec<String> {
        self.mesh.get_active_nodes()
    }

    pub fn is_synchronized(&self) -> bool {
        self.sync.is_synchronized()
    }

    /// Install the sink for all mesh packets this node processes.
    pub fn set_packet_handler(&self, handler: PacketHandler) {
        *self.user_handler.lock().unwrap() = Some(handler);
    }

    /// Enqueue a packet on the local dispatch queue.
    pub fn send_packet(&self, packet: MeshPacket) -> bool {
        if !self.mesh.is_running() {
            tracing::warn!("send_packet: mesh is not running");
            return false;
        }
        self.mesh.send_packet(packet);
        true
    }

    /// Seal a packet for the wire: serialize, then AEAD under the network
    /// key. These are the bytes the external transport carries.
    pub fn seal_packet(&self, packet: &MeshPacket) -> Result<Vec<u8>> {
        let plaintext = packet.encode()?;
        self.crypto.lock().unwrap().encrypt(&plaintext)
    }

    /// Open wire bytes into a packet: AEAD verify/decrypt, then parse.
    pub fn open_packet(&self, wire: &[u8]) -> Result<MeshPacket> {
        let plaintext = self.crypto.lock().unwrap().decrypt(wire)?;
        MeshPacket::decode(&plaintext)
    }

    /// Full ingest path for bytes arriving from the transport: open and
    /// hand to the dispatch worker.
    pub fn ingest_wire(&self, wire: &[u8]) -> Result<()> {
        let packet = self.open_packet(wire)?;
        self.mesh.send_packet(packet);
        Ok(())
    }

    /// This node's Ed25519 verifying key.
    pub fn public_key(&self) -> [u8; 32] {
        self.crypto.lock().unwrap().public_key()
    }

    /// This node's X25519 exchange key.
    pub fn exchange_public_key(&self) -> [u8; 32] {
        self.crypto.lock().unwrap().exchange_public_key()
    }

    /// Learn a peer's signing key.
    pub fn register_node_key(&self, node_id: &str, public_key: &[u8]) -> bool {
        match self
            .crypto
            .lock()
            .unwrap()
            .register_node_key(node_id, public_key)
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(node_id, "rejected node key: {}", e);
                false
            }
        }
    }

    pub fn generate_security_token(&self, node_id: &str, ttl_seconds: u64) -> Result<Vec<u8>> {
        self.crypto
            .lock()
            .unwrap()
            .generate_security_token(node_id, ttl_seconds)
    }

    pub fn verify_security_token(&self, token: &[u8]) -> Result<(String, u64)> {
        self.crypto.lock().unwrap().verify_security_token(token)
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &SaberConfig {
        &self.config
    }

    /// Stop the ticker, the playback engine and the mesh worker.
    pub fn shutdown(&self) {
        if self.ticker_running.swap(false, Ordering::SeqCst) {
            if let Some(handle) = self.ticker.lock().unwrap().take() {
                let _ = handle.join();
            }
        }

        if let Some(engine) = &self.engine {
            engine.lock().unwrap().stop();
        }

        self.mesh.stop();
        tracing::info!(node_id = %self.config.node_id, "SABER protocol shut down");
    }
}

impl Drop for SaberProtocol {
    fn drop(&mut self) {
        self.shutdown();
    }
}
