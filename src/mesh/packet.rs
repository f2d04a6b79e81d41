//! Mesh wire messages
//!
//! The five packet kinds exchanged between mesh nodes, with a
//! self-describing wire encoding. Accessors are total for their variant and
//! report `WrongPacketType` otherwise.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MeshError, Result};

/// A message on the mesh control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshPacket {
    /// Connectivity probe carrying the sender's clock
    Ping { source: String, timestamp: u64 },
    /// Playback control command with free-form parameters
    Command {
        cmd_type: String,
        params: HashMap<String, String>,
    },
    /// A node's buffer fill and measured latency
    Status {
        node_id: String,
        buffer: u8,
        latency: u32,
    },
    /// Master-clock broadcast
    TimeBeacon { master_time: u64 },
    /// Forced resynchronization of specific nodes (all nodes when empty)
    EmergencySync {
        master_time: u64,
        targets: Vec<String>,
    },
}

impl MeshPacket {
    pub fn ping(source: impl Into<String>, timestamp: u64) -> Self {
        Self::Ping {
            source: source.into(),
            timestamp,
        }
    }

    pub fn command(cmd_type: impl Into<String>, params: HashMap<String, String>) -> Self {
        Self::Command {
            cmd_type: cmd_type.into(),
            params,
        }
    }

    pub fn status(node_id: impl Into<String>, buffer: u8, latency: u32) -> Self {
        Self::Status {
            node_id: node_id.into(),
            buffer,
            latency,
        }
    }

    pub fn time_beacon(master_time: u64) -> Self {
        Self::TimeBeacon { master_time }
    }

    pub fn emergency_sync(master_time: u64, targets: Vec<String>) -> Self {
        Self::EmergencySync {
            master_time,
            targets,
        }
    }

    /// Variant name, for logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "Ping",
            Self::Command { .. } => "Command",
            Self::Status { .. } => "Status",
            Self::TimeBeacon { .. } => "TimeBeacon",
            Self::EmergencySync { .. } => "EmergencySync",
        }
    }

    pub fn ping_data(&self) -> Result<(&str, u64)> {
        match self {
            Self::Ping { source, timestamp } => Ok((source, *timestamp)),
            other => Err(wrong_type("Ping", other)),
        }
    }

    pub fn command_data(&self) -> Result<(&str, &HashMap<String, String>)> {
        match self {
            Self::Command { cmd_type, params } => Ok((cmd_type, params)),
            other => Err(wrong_type("Command", other)),
        }
    }

    pub fn status_data(&self) -> Result<(&str, u8, u32)> {
        match self {
            Self::Status {
                node_id,
                buffer,
                latency,
            } => Ok((node_id, *buffer, *latency)),
            other => Err(wrong_type("Status", other)),
        }
    }

    pub fn time_beacon_data(&self) -> Result<u64> {
        match self {
            Self::TimeBeacon { master_time } => Ok(*master_time),
            other => Err(wrong_type("TimeBeacon", other)),
        }
    }

    pub fn emergency_sync_data(&self) -> Result<(u64, &[String])> {
        match self {
            Self::EmergencySync {
                master_time,
                targets,
            } => Ok((*master_time, targets)),
            other => Err(wrong_type("EmergencySync", other)),
        }
    }

    /// Serialize for the wire. The envelope encryption is layered on top by
    /// the crypto engine.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MeshError::Encode(e.to_string()).into())
    }

    /// Parse a packet from decrypted wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| MeshError::Decode(e.to_string()).into())
    }
}

fn wrong_type(expected: &'static str, actual: &MeshPacket) -> crate::error::Error {
    MeshError::WrongPacketType {
        expected,
        actual: actual.kind(),
    }
    .into()
}
