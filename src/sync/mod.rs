//! Master-clock synchronization
//!
//! Maintains the single scalar offset that translates local wall-clock
//! milliseconds into master-clock milliseconds, plus the per-node latency
//! samples that size the playback buffer. The latest beacon always wins;
//! no smoothing is applied.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::constants::{INITIAL_BUFFER_MS, MAX_BUFFER_MS, MAX_JITTER_MS};

/// Headroom added on top of the measured latency when sizing the buffer.
const BUFFER_HEADROOM_MS: u32 = 10;

struct SyncState {
    time_offset_ms: i64,
    last_beacon: Option<Instant>,
    node_latencies: HashMap<String, u32>,
    is_synced: bool,
}

/// Tracks the offset between local and master time.
pub struct SyncManager {
    state: Mutex<SyncState>,
    max_jitter_ms: u32,
}

impl SyncManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncState {
                time_offset_ms: 0,
                last_beacon: None,
                node_latencies: HashMap::new(),
                is_synced: false,
            }),
            max_jitter_ms: MAX_JITTER_MS,
        }
    }

    /// Local wall clock in unix milliseconds.
    fn wall_clock_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Current master-clock time: wall clock plus the beacon offset.
    pub fn now(&self) -> u64 {
        let offset = self.state.lock().unwrap().time_offset_ms;
        let wall = Self::wall_clock_ms();
        if offset >= 0 {
            wall + offset as u64
        } else {
            wall.saturating_sub(offset.unsigned_abs())
        }
    }

    /// Adopt the master time carried by a beacon. Latest beacon wins.
    pub fn handle_time_beacon(&self, master_time_ms: u64) -> bool {
        let offset = master_time_ms as i64 - Self::wall_clock_ms() as i64;

        let mut state = self.state.lock().unwrap();
        state.time_offset_ms = offset;
        state.last_beacon = Some(Instant::now());
        state.is_synced = true;

        tracing::debug!(offset_ms = offset, "time beacon applied");
        true
    }

    pub fn is_synchronized(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.last_beacon.is_some() && state.is_synced
    }

    pub fn time_offset_ms(&self) -> i64 {
        self.state.lock().unwrap().time_offset_ms
    }

    /// Record the measured round-trip latency for a node (upsert).
    pub fn update_node_latency(&self, node_id: &str, latency_ms: u32) {
        let mut state = self.state.lock().unwrap();
        state.node_latencies.insert(node_id.to_string(), latency_ms);
    }

    /// Arithmetic mean over known node latencies.
    pub fn get_average_latency(&self) -> Option<f32> {
        let state = self.state.lock().unwrap();
        if state.node_latencies.is_empty() {
            return None;
        }
        let sum: u32 = state.node_latencies.values().sum();
        Some(sum as f32 / state.node_latencies.len() as f32)
    }

    /// Whether a node's reported clock deviates beyond the jitter budget.
    pub fn is_node_out_of_sync(&self, node_id: &str, reported_time_ms: u64) -> bool {
        let deviation = self.now().abs_diff(reported_time_ms);
        let out = deviation > u64::from(self.max_jitter_ms);
        if out {
            tracing::warn!(node_id, deviation_ms = deviation, "node out of sync");
        }
        out
    }

    /// Buffer sized slightly above the latency, capped at the hard ceiling.
    pub fn calculate_buffer_adjustment(&self, node_latency_ms: u32) -> u32 {
        (node_latency_ms + BUFFER_HEADROOM_MS).min(MAX_BUFFER_MS)
    }

    /// Optimal playback buffer from the average latency, or the initial
    /// default when nothing has been measured yet.
    pub fn get_optimal_buffer_size(&self) -> u32 {
        match self.get_average_latency() {
            Some(avg) => self.calculate_buffer_adjustment(avg as u32),
            None => INITIAL_BUFFER_MS,
        }
    }

    /// Forced resynchronization: apply the master time and discard all
    /// latency samples so buffer sizing restarts from scratch.
    pub fn emergency_sync(&self, master_time_ms: u64) -> bool {
        let result = self.handle_time_beacon(master_time_ms);

        let mut state = self.state.lock().unwrap();
        let discarded = state.node_latencies.len();
        state.node_latencies.clear();

        tracing::warn!(
            master_time_ms,
            discarded_latency_samples = discarded,
            "emergency sync applied"
        );
        result
    }
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsynced_by_default() {
        let sync = SyncManager::new();
        assert!(!sync.is_synchronized());
        assert_eq!(sync.time_offset_ms(), 0);
    }

    #[test]
    fn test_beacon_sets_offset() {
        let sync = SyncManager::new();
        let master = SyncManager::wall_clock_ms() + 123;

        assert!(sync.handle_time_beacon(master));
        assert!(sync.is_synchronized());

        // now() tracks the master clock within scheduling slop
        let now = sync.now();
        assert!(now >= master && now <= master + 5, "now={now} master={master}");
    }

    #[test]
    fn test_beacon_with_master_behind_local() {
        let sync = SyncManager::new();
        let master = SyncManager::wall_clock_ms() - 10_000;

        sync.handle_time_beacon(master);
        assert!(sync.time_offset_ms() <= -9_995);

        let now = sync.now();
        assert!(now >= master && now <= master + 5);
    }

    #[test]
    fn test_latest_beacon_wins() {
        let sync = SyncManager::new();
        sync.handle_time_beacon(SyncManager::wall_clock_ms() + 500);
        sync.handle_time_beacon(SyncManager::wall_clock_ms() + 42);

        let offset = sync.time_offset_ms();
        assert!((41..=43).contains(&offset), "offset={offset}");
    }

    #[test]
    fn test_average_latency() {
        let sync = SyncManager::new();
        assert_eq!(sync.get_average_latency(), None);

        sync.update_node_latency("a", 12);
        sync.update_node_latency("b", 18);
        sync.update_node_latency("c", 30);
        assert_eq!(sync.get_average_latency(), Some(20.0));

        // Upsert replaces, not accumulates
        sync.update_node_latency("c", 12);
        assert_eq!(sync.get_average_latency(), Some(14.0));
    }

    #[test]
    fn test_buffer_adjustment_monotone_and_capped() {
        let sync = SyncManager::new();
        let mut last = 0;
        for latency in 0..100 {
            let adjusted = sync.calculate_buffer_adjustment(latency);
            assert!(adjusted >= last);
            assert!(adjusted <= MAX_BUFFER_MS);
            last = adjusted;
        }
        assert_eq!(sync.calculate_buffer_adjustment(5), 15);
        assert_eq!(sync.calculate_buffer_adjustment(30), 40);
        assert_eq!(sync.calculate_buffer_adjustment(1000), 40);
    }

    #[test]
    fn test_optimal_buffer_size() {
        let sync = SyncManager::new();
        // No measurements yet: initial default
        assert_eq!(sync.get_optimal_buffer_size(), INITIAL_BUFFER_MS);

        sync.update_node_latency("a", 12);
        sync.update_node_latency("b", 18);
        sync.update_node_latency("c", 30);
        assert_eq!(sync.get_optimal_buffer_size(), 30);

        sync.update_node_latency("a", 50);
        sync.update_node_latency("b", 60);
        sync.update_node_latency("c", 55);
        assert_eq!(sync.get_optimal_buffer_size(), 40);
    }

    #[test]
    fn test_jitter_detection() {
        let sync = SyncManager::new();
        sync.handle_time_beacon(SyncManager::wall_clock_ms());

        let now = sync.now();
        assert!(!sync.is_node_out_of_sync("n", now + 4));
        assert!(!sync.is_node_out_of_sync("n", now.saturating_sub(4)));
        assert!(sync.is_node_out_of_sync("n", now + 600));
        assert!(sync.is_node_out_of_sync("n", now.saturating_sub(600)));
    }

    #[test]
    fn test_emergency_sync_clears_latencies() {
        let sync = SyncManager::new();
        sync.update_node_latency("a", 25);
        assert!(sync.get_average_latency().is_some());

        let master = SyncManager::wall_clock_ms() + 77;
        assert!(sync.emergency_sync(master));

        assert!(sync.is_synchronized());
        assert_eq!(sync.get_average_latency(), None);
        assert_eq!(sync.get_optimal_buffer_size(), INITIAL_BUFFER_MS);
    }
}
