use parking_lot::RwLock;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::{Error, MacAddress, Result, MISSED_REPLY_LIMIT};
use crate::protocol::PollReply;

/// Registry shared between the discovery task (writer) and everyone else
pub type SharedRegistry = Arc<RwLock<NodeRegistry>>;

/// Connection state of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    NeverConnected,
    /// Carries the node report of the latest reply
    Connected(String),
    LostConnection,
}

impl NodeStatus {
    /// Statuses that poll cycles no longer age
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Connected(_))
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::NeverConnected => f.write_str("Never connected"),
            NodeStatus::Connected(report) => f.write_str(report),
            NodeStatus::LostConnection => f.write_str("Lost connection!"),
        }
    }
}

/// A remote Art-Net node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Short name, updated from every reply
    pub name: String,
    /// Identity once learned
    pub mac: Option<MacAddress>,
    pub ip: Option<Ipv4Addr>,
    /// Port from the latest reply
    pub port: u16,
    pub status: NodeStatus,
    /// Consecutive poll cycles without a reply
    pub subsequent_missed_replies: u32,
    /// Manifest devices attached to this node
    pub devices: Vec<String>,
}

impl Node {
    fn expected(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            mac: None,
            ip: None,
            port: 0,
            status: NodeStatus::NeverConnected,
            subsequent_missed_replies: 0,
            devices: Vec::new(),
        }
    }

    fn update_from(&mut self, reply: &PollReply) {
        self.name = reply.short_name.clone();
        self.mac = Some(reply.mac);
        self.ip = Some(reply.ip);
        self.port = reply.port;
        self.status = NodeStatus::Connected(reply.node_report.clone());
        self.subsequent_missed_replies = 0;
    }

    /// Socket address from the latest reply
    pub fn addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(IpAddr::V4(ip), self.port))
    }
}

/// Outcome of a poll cycle for a single node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessChange {
    /// Unknown MAC and unknown name
    Registered { name: String, mac: MacAddress },
    /// Expected node replied for the first time
    FirstConnection { name: String, mac: MacAddress },
    /// Node replied after missing at least one cycle
    Regained { name: String },
    Missed { name: String, missed: u32 },
    Lost { name: String },
}

/// Known nodes in insertion order
///
/// Replying nodes are keyed by MAC. Manifest nodes start out as
/// [`NodeStatus::NeverConnected`]; nodes are never removed.
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    missed_reply_limit: u32,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        NodeRegistry::new(MISSED_REPLY_LIMIT)
    }
}

impl NodeRegistry {
    /// Creates an empty registry
    pub fn new(missed_reply_limit: u32) -> Self {
        NodeRegistry {
            nodes: Vec::new(),
            missed_reply_limit,
        }
    }

    /// Wraps the registry for sharing
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Pre-registers a node from the manifest
    pub fn add_expected(&mut self, name: &str, devices: impl IntoIterator<Item = String>) {
        let index = match self.nodes.iter().position(|n| n.name == name) {
            Some(index) => index,
            None => {
                self.nodes.push(Node::expected(name));
                self.nodes.len() - 1
            }
        };
        self.nodes[index].devices.extend(devices);
    }

    /// Applies the replies of one poll cycle
    pub fn handle_poll_replies(&mut self, replies: &[PollReply]) -> Vec<LivenessChange> {
        let mut changes = Vec::new();
        let mut collected = Vec::with_capacity(replies.len());

        for reply in replies {
            collected.push(reply.mac);
            let name = &reply.short_name;

            if let Some(index) = self.nodes.iter().position(|n| n.mac == Some(reply.mac)) {
                let node = &mut self.nodes[index];
                if node.subsequent_missed_replies > 0 {
                    info!("Node '{}' has regained the connection", node.name);
                    changes.push(LivenessChange::Regained { name: name.clone() });
                }
                node.update_from(reply);
            } else if let Some(index) = self.nodes.iter().position(|n| &n.name == name) {
                self.nodes[index].update_from(reply);
                info!("Node '{}' with mac {} connected for the first time", name, reply.mac);
                changes.push(LivenessChange::FirstConnection {
                    name: name.clone(),
                    mac: reply.mac,
                });
            } else {
                let mut node = Node::expected(name.clone());
                node.update_from(reply);
                self.nodes.push(node);
                info!("Unknown node '{}' with mac {} has been registered", name, reply.mac);
                changes.push(LivenessChange::Registered {
                    name: name.clone(),
                    mac: reply.mac,
                });
            }
        }

        for node in &mut self.nodes {
            if node.status.is_terminal() {
                continue;
            }
            if node.mac.map_or(false, |mac| collected.contains(&mac)) {
                continue;
            }

            node.subsequent_missed_replies += 1;
            let missed = node.subsequent_missed_replies;
            info!(
                "Node '{}' failed to reply ({} missed repl{})",
                node.name,
                missed,
                if missed > 1 { "ies" } else { "y" }
            );
            changes.push(LivenessChange::Missed {
                name: node.name.clone(),
                missed,
            });

            if missed >= self.missed_reply_limit {
                warn!("Node '{}' lost the connection", node.name);
                node.status = NodeStatus::LostConnection;
                changes.push(LivenessChange::Lost {
                    name: node.name.clone(),
                });
            }
        }

        changes
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn by_mac(&self, mac: &MacAddress) -> Option<&Node> {
        self.nodes.iter().find(|n| n.mac.as_ref() == Some(mac))
    }

    /// Name of the node owning `device`
    pub fn node_of_device(&self, device: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.devices.iter().any(|d| d == device))
    }

    /// Resolves a node name or a literal IPv4 address to an IP
    pub fn resolve(&self, name_or_ip: &str) -> Result<IpAddr> {
        if let Ok(ip) = name_or_ip.parse::<Ipv4Addr>() {
            return Ok(IpAddr::V4(ip));
        }
        match self.get(name_or_ip) {
            Some(Node { ip: Some(ip), .. }) => Ok(IpAddr::V4(*ip)),
            Some(_) => Err(Error::node_not_found(format!(
                "Node '{}' has no known IP address",
                name_or_ip
            ))),
            None => Err(Error::node_not_found(format!(
                "'{}' is neither an IP address nor a known node",
                name_or_ip
            ))),
        }
    }

    /// Like [`resolve`](Self::resolve) but yields a socket address
    ///
    /// Accepts `ip:port` literals. Literal IPs use `default_port`, nodes the
    /// port from their latest reply.
    pub fn resolve_addr(&self, name_or_ip: &str, default_port: u16) -> Result<SocketAddr> {
        if let Ok(addr) = name_or_ip.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let ip = self.resolve(name_or_ip)?;
        let port = match self.get(name_or_ip) {
            Some(node) if node.port != 0 => node.port,
            _ => default_port,
        };
        Ok(SocketAddr::new(ip, port))
    }
}
