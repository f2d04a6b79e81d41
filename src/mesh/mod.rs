//! Mesh networking subsystem

pub mod network;
pub mod node;
pub mod packet;

pub use network::{MeshNetwork, PacketHandler};
pub use node::{Node, NodeRole};
pub use packet::MeshPacket;
