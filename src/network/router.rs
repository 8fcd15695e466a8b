use rand::Rng;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::core::{IncomingLog, ResponderConfig};
use crate::device::Sensor;
use crate::event::{Event, EventBus};
use crate::protocol::{Command, Dmx, OpCode, Packet, PollReply, Trigger, PING, RETURN_PING};
use super::ping::PingReply;
use super::transport::{Received, Transport};

/// Logs at info when the switch is on, debug otherwise
macro_rules! incoming {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            info!($($arg)+)
        } else {
            debug!($($arg)+)
        }
    };
}

/// Forwards every opcode the router handles from the receive task
pub fn attach(transport: &Transport, tx: mpsc::UnboundedSender<Received>) {
    for op_code in [
        OpCode::Poll,
        OpCode::PollReply,
        OpCode::Command,
        OpCode::Dmx,
        OpCode::Nzs,
        OpCode::Sync,
        OpCode::Address,
        OpCode::Trigger,
        OpCode::IpProg,
    ] {
        let tx = tx.clone();
        transport.subscribe(op_code, move |received| {
            let _ = tx.send(received);
        });
    }
}

/// Answers polls and pings on behalf of this process
#[derive(Debug, Clone)]
pub struct Responder {
    config: ResponderConfig,
    ip: Ipv4Addr,
    port: u16,
}

impl Responder {
    /// Returns `None` when answering is disabled
    pub fn from_config(config: &ResponderConfig, transport: &Transport) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let ip = config.ip.unwrap_or_else(|| match transport.local_ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        });
        Some(Responder {
            config: config.clone(),
            ip,
            port: transport.local_addr().port(),
        })
    }

    fn poll_reply(&self) -> PollReply {
        PollReply::new(
            self.ip,
            self.port,
            self.config.short_name.clone(),
            self.config.long_name.clone(),
            self.config.node_report.clone(),
            self.config.mac,
        )
    }

    fn reply_delay(&self) -> Duration {
        let max = self.config.max_reply_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Channels and state the router feeds
pub struct RouterParts {
    pub transport: Transport,
    pub bus: EventBus,
    pub sensors: HashMap<String, Sensor>,
    /// Fixture names by universe, for log lines
    pub universes: HashMap<u16, String>,
    pub reply_tx: mpsc::UnboundedSender<PollReply>,
    pub ping_tx: mpsc::UnboundedSender<PingReply>,
    pub log: IncomingLog,
    pub responder: Option<Responder>,
}

/// Turns inbound packets into events, replies and registry updates
///
/// Runs on its own task so the receive task never waits on it.
pub struct Router {
    rx: mpsc::UnboundedReceiver<Received>,
    parts: RouterParts,
}

impl Router {
    pub fn new(rx: mpsc::UnboundedReceiver<Received>, parts: RouterParts) -> Self {
        Router { rx, parts }
    }

    pub async fn run(mut self) {
        while let Some(received) = self.rx.recv().await {
            self.route(received).await;
        }
        debug!("Inbound router stopped");
    }

    async fn route(&mut self, received: Received) {
        let Received {
            op_code,
            sender,
            packet,
            timestamp,
        } = received;

        match packet {
            Packet::Trigger(trigger) => {
                if let Some(mut event) = self.handle_trigger(&trigger, sender) {
                    event.timestamp = timestamp;
                    if let Err(e) = self.parts.bus.publish(event) {
                        warn!("Dropping trigger event: {}", e);
                    }
                }
            }
            Packet::PollReply(reply) => {
                incoming!(
                    self.parts.log.poll_reply,
                    "Receiving ArtPollReply from {}: '{}' {}",
                    sender,
                    reply.short_name,
                    reply.node_report
                );
                let _ = self.parts.reply_tx.send(reply);
            }
            Packet::Command(command) => self.handle_command(&command, sender).await,
            Packet::Poll(poll) => {
                debug!("Receiving ArtPoll from {} (flags {:#04x})", sender, poll.flags);
                self.answer_poll(sender);
            }
            Packet::Dmx(dmx) => self.log_dmx(&dmx, sender),
            Packet::Nzs(nzs) => debug!(
                "Receiving ArtNzs from {}: universe {} start code {:#04x} ({} channels)",
                sender,
                nzs.universe,
                nzs.start_code,
                nzs.data.len()
            ),
            _ => debug!("Receiving {} from {}", op_code, sender),
        }
    }

    /// Builds the event for a control panel trigger, if it should fire one
    fn handle_trigger(&self, trigger: &Trigger, sender: SocketAddr) -> Option<Event> {
        incoming!(
            self.parts.log.trigger,
            "Receiving ArtTrigger from {}: key {} subkey {} ({} bytes)",
            sender,
            trigger.key,
            trigger.sub_key,
            trigger.data.len()
        );

        let Some((name, payload)) = trigger.control_panel_payload() else {
            trace!("Ignoring trigger with key {} from {}", trigger.key, sender);
            return None;
        };
        let Some(sensor) = self.parts.sensors.get(name) else {
            debug!("Trigger for unknown device '{}' from {}", name, sender);
            return None;
        };
        if !sensor.sequence.accept(trigger.sub_key) {
            debug!(
                "Ignoring out of order trigger {} for '{}' (last {})",
                trigger.sub_key,
                name,
                sensor.sequence.current()
            );
            return None;
        }
        if sensor.muted {
            return None;
        }

        match sensor.parse_trigger_payload(payload) {
            Ok(Some((action, value))) => Some(Event::new(name, action, Some(value), sender)),
            Ok(None) => {
                trace!("No state change for '{}' from {}", name, sender);
                None
            }
            Err(e) => {
                warn!("Malformed payload for '{}' from {}: {}", name, sender, e);
                None
            }
        }
    }

    async fn handle_command(&self, command: &Command, sender: SocketAddr) {
        incoming!(
            self.parts.log.command,
            "Receiving ArtCommand from {}: {}",
            sender,
            command.text()
        );

        if command.is(RETURN_PING) {
            let _ = self.parts.ping_tx.send(PingReply {
                from: sender,
                at: Instant::now(),
            });
        } else if command.is(PING) && self.parts.responder.is_some() {
            if let Err(e) = self
                .parts
                .transport
                .send_command(RETURN_PING.as_bytes(), Some(sender))
                .await
            {
                warn!("Failed to answer ping from {}: {}", sender, e);
            }
        }
    }

    /// Answers after a random delay so nodes do not reply in lockstep
    fn answer_poll(&self, sender: SocketAddr) {
        let Some(responder) = &self.parts.responder else {
            return;
        };
        let reply = responder.poll_reply();
        let delay = responder.reply_delay();
        let transport = self.parts.transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = transport.send_poll_reply(reply, sender).await {
                warn!("Failed to answer poll from {}: {}", sender, e);
            }
        });
    }

    fn log_dmx(&self, dmx: &Dmx, sender: SocketAddr) {
        let fixture = self
            .parts
            .universes
            .get(&dmx.universe)
            .map(String::as_str)
            .unwrap_or("unknown fixture");
        incoming!(
            self.parts.log.dmx,
            "Receiving ArtDmx from {}: universe {} ({}) seq {} ({} channels)",
            sender,
            dmx.universe,
            fixture,
            dmx.sequence,
            dmx.data.len()
        );
    }
}
