//! Core types and constants for the Art-Net engine
//!
//! This module contains the building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{Config, IncomingLog, MacAddress, ResponderConfig};

/// Default UDP port for Art-Net
pub const ART_NET_PORT: u16 = 6454;

/// Art-Net protocol revision written into outgoing packets
pub const PROTOCOL_VERSION: u16 = 14;

/// Trigger Key identifying the private control panel protocol
pub const KEY_CONTROL_PANEL_PROTOCOL: u8 = 76;

/// Receive buffer size for a single datagram
pub const MAX_PACKET_SIZE: usize = 1024;

/// Consecutive missed poll replies before a node is marked lost
pub const MISSED_REPLY_LIMIT: u32 = 3;

/// Wraparound tolerance of the sequence guard
pub const SEQUENCE_WINDOW: u8 = 16;
