//! Art-Net protocol engine and event routing core
//!
//! This library talks Art-Net to ESP32 control panel nodes: it discovers
//! nodes with ArtPoll, turns their ArtTrigger sensor reports into events,
//! and drives DMX fixtures with retransmitted ArtDmx frames.
pub mod core;
pub mod device;
pub mod event;
pub mod network;
pub mod protocol;
mod util;

// Re-export commonly used items
pub use crate::core::{Config, Error, Result};
pub use crate::device::DeviceManifest;
pub use crate::event::{Callback, Condition, Event, EventBus, EventValue, SubscribeOptions};
pub use crate::network::NetworkManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
