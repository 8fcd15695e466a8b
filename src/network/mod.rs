//! Network management and node communication module
//!
//! This module owns the Art-Net socket, keeps track of remote nodes, and
//! routes inbound packets to devices and the event bus.

mod discovery;
mod ping;
mod registry;
mod router;
mod transport;

pub use self::discovery::{DiscoveryConfig, DiscoveryHandle, NodeDiscovery};
pub use self::ping::{PingReply, PingReport, Pinger};
pub use self::registry::{LivenessChange, Node, NodeRegistry, NodeStatus, SharedRegistry};
pub use self::router::{Responder, Router, RouterParts};
pub use self::transport::{Handler, Received, Transport};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::{Config, Error, Result};
use crate::device::{DeviceManifest, DeviceRegistry, Fixture};
use crate::event::EventBus;
use crate::protocol::Trigger;

/// Running Art-Net engine
///
/// Owns the receive, router, dispatcher and discovery tasks; dropping the
/// manager stops them.
pub struct NetworkManager {
    config: Config,
    transport: Transport,
    registry: SharedRegistry,
    bus: EventBus,
    discovery: DiscoveryHandle,
    pinger: Pinger,
    fixtures: HashMap<String, Fixture>,
    tasks: Vec<JoinHandle<()>>,
}

impl NetworkManager {
    /// Binds the socket, loads devices and starts all background tasks
    pub async fn start(config: Config, manifest: Option<DeviceManifest>) -> Result<Self> {
        config.validate()?;

        let transport = Transport::bind(&config).await?;
        let registry = NodeRegistry::new(config.missed_reply_limit).into_shared();
        let local = SocketAddr::new(transport.local_ip(), transport.local_addr().port());
        let (bus, dispatcher) = EventBus::new(local);

        let devices = match &manifest {
            Some(manifest) => DeviceRegistry::from_manifest(manifest, &config, &transport, &registry)?,
            None => DeviceRegistry::default(),
        };
        let (sensors, fixtures) = devices.into_parts();
        let universes = fixtures
            .values()
            .map(|f| (f.universe(), f.name().to_string()))
            .collect();

        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (ping_tx, ping_rx) = mpsc::unbounded_channel();

        let router = Router::new(
            packet_rx,
            RouterParts {
                transport: transport.clone(),
                bus: bus.clone(),
                sensors,
                universes,
                reply_tx,
                ping_tx,
                log: config.log_incoming.clone(),
                responder: Responder::from_config(&config.responder, &transport),
            },
        );
        router::attach(&transport, packet_tx);

        let (discovery, discovery_handle) = NodeDiscovery::new(
            transport.clone(),
            registry.clone(),
            DiscoveryConfig::from(&config),
            reply_rx,
        );
        let pinger = Pinger::new(transport.clone(), ping_rx);

        let receiver = transport.clone();
        let tasks = vec![
            tokio::spawn(async move {
                if let Err(e) = receiver.receive_loop().await {
                    warn!("Receive loop stopped: {}", e);
                }
            }),
            tokio::spawn(router.run()),
            tokio::spawn(dispatcher.run()),
            tokio::spawn(discovery.run()),
        ];

        info!(
            "Art-Net engine listening on {} ({} fixtures)",
            transport.local_addr(),
            fixtures.len()
        );

        Ok(NetworkManager {
            config,
            transport,
            registry,
            bus,
            discovery: discovery_handle,
            pinger,
            fixtures,
            tasks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn nodes(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Snapshot of a node's current state
    pub fn node(&self, name: &str) -> Option<Node> {
        self.registry.read().get(name).cloned()
    }

    pub fn fixture(&self, name: &str) -> Option<&Fixture> {
        self.fixtures.get(name)
    }

    pub fn fixtures(&self) -> impl Iterator<Item = &Fixture> {
        self.fixtures.values()
    }

    /// Resolves a node name or an `ip[:port]` literal
    pub fn resolve(&self, name_or_ip: &str) -> Result<SocketAddr> {
        self.registry
            .read()
            .resolve_addr(name_or_ip, self.config.broadcast_addr.port())
    }

    /// Measures round-trip times to a node
    pub async fn ping(&self, name_or_ip: &str, count: u32, timeout: Duration) -> Result<PingReport> {
        let target = self.resolve(name_or_ip)?;
        self.pinger.ping(target, count, timeout).await
    }

    /// Runs a poll cycle now instead of waiting for the next tick
    pub async fn poll_now(&self) -> Result<Vec<LivenessChange>> {
        self.discovery.poll_now().await
    }

    /// Sends an ArtCommand to a node, or broadcasts it
    pub async fn send_command(&self, command: &str, target: Option<&str>) -> Result<()> {
        let target = target.map(|t| self.resolve(t)).transpose()?;
        self.transport.send_command(command.as_bytes(), target).await
    }

    /// Drives a fixture by name, or a raw universe given as a number
    pub async fn send_dmx(&self, fixture_or_universe: &str, values: &[u8]) -> Result<()> {
        if let Some(fixture) = self.fixtures.get(fixture_or_universe) {
            return fixture.send_dmx(values);
        }
        let universe: u16 = fixture_or_universe.parse().map_err(|_| {
            Error::invalid_state(format!(
                "'{}' is neither a fixture nor a universe",
                fixture_or_universe
            ))
        })?;
        self.transport.send_dmx(universe, 0, values, None).await
    }

    /// Broadcasts a control panel trigger as if sent by a node's sensor
    pub async fn send_trigger(&self, device: &str, sequence: u8, payload: &[u8]) -> Result<()> {
        let trigger = Trigger::control_panel(device, sequence, payload);
        self.transport
            .send_trigger(trigger.key, trigger.sub_key, &trigger.data)
            .await
    }

    /// Stops all background tasks
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for NetworkManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
