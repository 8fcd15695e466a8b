use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::core::{Config, Error, Result};
use crate::protocol::PollReply;
use super::registry::{LivenessChange, SharedRegistry};
use super::transport::Transport;

/// Configuration for node discovery
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Time between ArtPoll broadcasts
    pub poll_interval: Duration,
    /// How long replies are collected after each poll
    pub reply_window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            poll_interval: Duration::from_secs(60),
            reply_window: Duration::from_secs(3),
        }
    }
}

impl From<&Config> for DiscoveryConfig {
    fn from(config: &Config) -> Self {
        DiscoveryConfig {
            poll_interval: config.poll_interval,
            reply_window: config.poll_reply_window,
        }
    }
}

type PollRequest = oneshot::Sender<Vec<LivenessChange>>;

/// Requests immediate poll cycles from a running [`NodeDiscovery`]
#[derive(Clone)]
pub struct DiscoveryHandle {
    request_tx: mpsc::UnboundedSender<PollRequest>,
}

impl DiscoveryHandle {
    /// Runs a poll cycle now and returns its liveness changes
    pub async fn poll_now(&self) -> Result<Vec<LivenessChange>> {
        let (tx, rx) = oneshot::channel();
        self.request_tx
            .send(tx)
            .map_err(|_| Error::invalid_state("Discovery task is not running"))?;
        rx.await
            .map_err(|_| Error::invalid_state("Discovery task stopped during the poll"))
    }
}

/// Periodically polls the network and feeds the node registry
///
/// This task is the only writer of the registry.
pub struct NodeDiscovery {
    transport: Transport,
    registry: SharedRegistry,
    config: DiscoveryConfig,
    /// Poll replies handed over by the inbound router
    reply_rx: mpsc::UnboundedReceiver<PollReply>,
    request_rx: mpsc::UnboundedReceiver<PollRequest>,
}

impl NodeDiscovery {
    /// Creates a new discovery loop and the handle to trigger it
    pub fn new(
        transport: Transport,
        registry: SharedRegistry,
        config: DiscoveryConfig,
        reply_rx: mpsc::UnboundedReceiver<PollReply>,
    ) -> (Self, DiscoveryHandle) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let discovery = NodeDiscovery {
            transport,
            registry,
            config,
            reply_rx,
            request_rx,
        };
        (discovery, DiscoveryHandle { request_tx })
    }

    /// Starts the discovery process
    pub async fn run(mut self) {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    self.poll_cycle().await;
                }
                Some(reply_to) = self.request_rx.recv() => {
                    let changes = self.poll_cycle().await;
                    let _ = reply_to.send(changes);
                    poll_interval.reset();
                }
            }
        }
    }

    /// Broadcasts an ArtPoll, collects replies and updates the registry
    async fn poll_cycle(&mut self) -> Vec<LivenessChange> {
        // Unsolicited replies since the last cycle count as well
        let mut replies = Vec::new();
        while let Ok(reply) = self.reply_rx.try_recv() {
            replies.push(reply);
        }

        if let Err(e) = self.transport.send_poll(None).await {
            warn!("Failed to send ArtPoll: {}", e);
        }

        let deadline = Instant::now() + self.config.reply_window;
        while let Ok(Some(reply)) = timeout_at(deadline, self.reply_rx.recv()).await {
            replies.push(reply);
        }

        debug!("Poll cycle collected {} replies", replies.len());
        self.registry.write().handle_poll_replies(&replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MacAddress;
    use crate::network::registry::NodeRegistry;
    use crate::protocol::{OpCode, Packet};
    use std::net::Ipv4Addr;

    fn test_config() -> Config {
        Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_poll_now_collects_replies() {
        let node = Transport::bind(&test_config()).await.unwrap();

        // The node answers any poll immediately
        let (poll_tx, mut poll_rx) = mpsc::unbounded_channel();
        node.subscribe(OpCode::Poll, move |received| {
            let _ = poll_tx.send(received.sender);
        });
        let node_rx = node.clone();
        let node_task = tokio::spawn(async move { node_rx.receive_loop().await });
        let node_tx = node.clone();
        let responder = tokio::spawn(async move {
            while let Some(sender) = poll_rx.recv().await {
                let reply = PollReply::new(
                    Ipv4Addr::LOCALHOST,
                    node_tx.local_addr().port(),
                    "esp-test",
                    "",
                    "OK",
                    MacAddress([2, 0, 0, 0, 0, 9]),
                );
                node_tx.send_poll_reply(reply, sender).await.unwrap();
            }
        });

        // Controller broadcasts straight to the node
        let controller = Transport::bind(&Config {
            broadcast_addr: node.local_addr(),
            ..test_config()
        })
        .await
        .unwrap();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        controller.subscribe(OpCode::PollReply, move |received| {
            if let Packet::PollReply(reply) = received.packet {
                let _ = reply_tx.send(reply);
            }
        });
        let controller_rx = controller.clone();
        let controller_task = tokio::spawn(async move { controller_rx.receive_loop().await });

        let registry = NodeRegistry::default().into_shared();
        let (discovery, handle) = NodeDiscovery::new(
            controller,
            registry.clone(),
            DiscoveryConfig {
                poll_interval: Duration::from_secs(3600),
                reply_window: Duration::from_millis(300),
            },
            reply_rx,
        );
        let discovery_task = tokio::spawn(discovery.run());

        // The startup cycle may already have registered the node
        let changes = handle.poll_now().await.unwrap();
        assert!(!changes
            .iter()
            .any(|c| matches!(c, LivenessChange::Missed { .. } | LivenessChange::Lost { .. })));

        let node_entry = registry.read().get("esp-test").cloned().unwrap();
        assert_eq!(node_entry.addr(), Some(node.local_addr()));
        assert_eq!(node_entry.status.to_string(), "OK");

        discovery_task.abort();
        controller_task.abort();
        responder.abort();
        node_task.abort();
    }

    #[tokio::test]
    async fn test_poll_now_without_task() {
        let transport = Transport::bind(&test_config()).await.unwrap();
        let (_reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (discovery, handle) = NodeDiscovery::new(
            transport,
            NodeRegistry::default().into_shared(),
            DiscoveryConfig::default(),
            reply_rx,
        );
        drop(discovery);
        assert!(matches!(handle.poll_now().await, Err(Error::InvalidState(_))));
    }
}
