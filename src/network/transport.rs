use bytes::BytesMut;
use futures::StreamExt;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::UdpSocket;
use tokio_util::codec::Encoder;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, trace, warn};

use crate::core::{Config, Error, Result};
use crate::protocol::{
    ArtNetCodec, Command, Datagram, Dmx, OpCode, Packet, Poll, PollReply, Trigger,
};
use crate::util;

/// A parsed packet together with where and when it arrived
#[derive(Debug, Clone)]
pub struct Received {
    pub op_code: OpCode,
    pub sender: SocketAddr,
    pub packet: Packet,
    pub timestamp: SystemTime,
}

/// Callback invoked on the receive task; must hand off and return quickly
pub type Handler = Arc<dyn Fn(Received) + Send + Sync>;

struct Shared {
    /// UDP socket for sending and receiving
    socket: Arc<UdpSocket>,
    /// Address the socket is bound to
    local_addr: SocketAddr,
    /// Address other hosts see our packets coming from
    local_ip: IpAddr,
    /// Destination of broadcasts
    broadcast_addr: SocketAddr,
    /// Process echoes of our own broadcasts
    accept_own_broadcast: AtomicBool,
    /// Handlers by opcode
    handlers: RwLock<HashMap<OpCode, Handler>>,
}

/// Art-Net UDP endpoint
///
/// Cheap to clone; all clones share the socket and the handler table.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    /// Binds a broadcast-capable socket as described by `config`
    pub async fn bind(config: &Config) -> Result<Self> {
        let socket = Socket::new(
            Domain::for_address(config.bind_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .map_err(|e| Error::network(format!("Failed to create socket: {}", e)))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket
            .bind(&config.bind_addr.into())
            .map_err(|e| Error::network(format!("Failed to bind {}: {}", config.bind_addr, e)))?;

        let socket = UdpSocket::from_std(socket.into())?;
        let local_addr = socket.local_addr()?;
        let local_ip = util::advertised_ip(local_addr);

        info!("Art-Net transport bound to {} (local ip {})", local_addr, local_ip);

        Ok(Transport {
            shared: Arc::new(Shared {
                socket: Arc::new(socket),
                local_addr,
                local_ip,
                broadcast_addr: config.broadcast_addr,
                accept_own_broadcast: AtomicBool::new(config.accept_own_broadcast),
                handlers: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Returns the local socket address
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Returns the IP other hosts reach us on
    pub fn local_ip(&self) -> IpAddr {
        self.shared.local_ip
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        self.shared.broadcast_addr
    }

    pub fn set_accept_own_broadcast(&self, accept: bool) {
        self.shared.accept_own_broadcast.store(accept, Ordering::Relaxed);
    }

    /// Registers the handler for an opcode, replacing any previous one
    pub fn subscribe<F>(&self, op_code: OpCode, handler: F)
    where
        F: Fn(Received) + Send + Sync + 'static,
    {
        self.shared.handlers.write().insert(op_code, Arc::new(handler));
    }

    /// Removes the handler for an opcode
    pub fn unsubscribe(&self, op_code: OpCode) {
        self.shared.handlers.write().remove(&op_code);
    }

    /// Sends raw bytes to `target`
    pub async fn send(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        self.shared
            .socket
            .send_to(data, target)
            .await
            .map_err(|e| Error::network(format!("Failed to send to {}: {}", target, e)))?;
        Ok(())
    }

    /// Sends raw bytes to the broadcast address
    pub async fn broadcast(&self, data: &[u8]) -> Result<()> {
        self.send(data, self.shared.broadcast_addr).await
    }

    /// Encodes and sends a packet; broadcasts when `target` is `None`
    pub async fn send_packet(&self, packet: Packet, target: Option<SocketAddr>) -> Result<()> {
        let op_code = packet.op_code();
        let mut buf = BytesMut::new();
        ArtNetCodec::new().encode(packet, &mut buf)?;

        let target = target.unwrap_or(self.shared.broadcast_addr);
        trace!("Sending {} ({} bytes) to {}", op_code, buf.len(), target);
        self.send(&buf, target).await
    }

    pub async fn send_dmx(
        &self,
        universe: u16,
        sequence: u8,
        data: &[u8],
        target: Option<SocketAddr>,
    ) -> Result<()> {
        let dmx = Dmx::new(universe, sequence, data.to_vec());
        self.send_packet(Packet::Dmx(dmx), target).await
    }

    /// Broadcasts an ArtTrigger
    pub async fn send_trigger(&self, key: u8, sub_key: u8, data: &[u8]) -> Result<()> {
        let trigger = Trigger::new(key, sub_key, data.to_vec());
        self.send_packet(Packet::Trigger(trigger), None).await
    }

    pub async fn send_command(&self, command: &[u8], target: Option<SocketAddr>) -> Result<()> {
        let command = Command::new(command.to_vec());
        self.send_packet(Packet::Command(command), target).await
    }

    pub async fn send_poll(&self, target: Option<SocketAddr>) -> Result<()> {
        self.send_packet(Packet::Poll(Poll::default()), target).await
    }

    pub async fn send_poll_reply(&self, reply: PollReply, target: SocketAddr) -> Result<()> {
        self.send_packet(Packet::PollReply(reply), Some(target)).await
    }

    /// Reads datagrams until the socket fails for good
    ///
    /// Each datagram is header-checked by the codec, matched to a handler by
    /// opcode and parsed. Packets without a handler or a valid payload are
    /// dropped here.
    pub async fn receive_loop(&self) -> Result<()> {
        let mut framed = UdpFramed::new(self.shared.socket.clone(), ArtNetCodec::new());

        while let Some(item) = framed.next().await {
            match item {
                Ok((datagram, sender)) => self.dispatch(datagram, sender),
                Err(Error::Io(e)) if is_transient(&e) => {
                    debug!("Transient receive error: {}", e);
                }
                Err(e) => {
                    warn!("Receive error: {}", e);
                }
            }
        }

        Ok(())
    }

    fn is_own_echo(&self, sender: SocketAddr) -> bool {
        sender.port() == self.shared.local_addr.port()
            && (sender.ip() == self.shared.local_ip || sender.ip() == self.shared.local_addr.ip())
    }

    fn dispatch(&self, datagram: Datagram, sender: SocketAddr) {
        if !self.shared.accept_own_broadcast.load(Ordering::Relaxed) && self.is_own_echo(sender) {
            trace!("Dropping own packet {:#06x}", datagram.op_code);
            return;
        }

        let Some(op_code) = datagram.known_op_code() else {
            debug!(
                "Received a packet with invalid op code {:#06x} from {}",
                datagram.op_code, sender
            );
            return;
        };

        let handler = match self.shared.handlers.read().get(&op_code) {
            Some(handler) => handler.clone(),
            None => {
                trace!("No handler for {} from {}", op_code, sender);
                return;
            }
        };

        let Some(packet) = Packet::parse_as(op_code, &datagram.data) else {
            debug!("Malformed {} from {} ({} bytes)", op_code, sender, datagram.data.len());
            return;
        };

        handler(Received {
            op_code,
            sender,
            packet,
            timestamp: SystemTime::now(),
        });
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ArtNetPacket, RETURN_PING};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn loopback_config() -> Config {
        Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_send_and_dispatch() {
        let a = Transport::bind(&loopback_config()).await.unwrap();
        let b = Transport::bind(&loopback_config()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.subscribe(OpCode::Command, move |received| {
            let _ = tx.send(received);
        });
        let receiver = b.clone();
        let handle = tokio::spawn(async move { receiver.receive_loop().await });

        a.send_command(RETURN_PING.as_bytes(), Some(b.local_addr()))
            .await
            .unwrap();

        let received = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.op_code, OpCode::Command);
        assert_eq!(received.sender, a.local_addr());
        match received.packet {
            Packet::Command(command) => assert!(command.is(RETURN_PING)),
            other => panic!("unexpected packet {:?}", other),
        }

        handle.abort();
    }

    #[tokio::test]
    async fn test_unhandled_and_malformed_are_dropped() {
        let a = Transport::bind(&loopback_config()).await.unwrap();
        let b = Transport::bind(&loopback_config()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.subscribe(OpCode::Dmx, move |received| {
            let _ = tx.send(received);
        });
        let receiver = b.clone();
        let handle = tokio::spawn(async move { receiver.receive_loop().await });

        // No handler for polls
        a.send_poll(Some(b.local_addr())).await.unwrap();
        // Garbage and a truncated Dmx
        a.send(b"hello", b.local_addr()).await.unwrap();
        let dmx = Dmx::new(1, 1, vec![1, 2, 3]).pack().unwrap();
        a.send(&dmx[..19], b.local_addr()).await.unwrap();
        // Valid Dmx last
        a.send_dmx(1, 2, &[9], Some(b.local_addr())).await.unwrap();

        let received = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match received.packet {
            Packet::Dmx(dmx) => {
                assert_eq!(dmx.sequence, 2);
                assert_eq!(dmx.data, vec![9]);
            }
            other => panic!("unexpected packet {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        handle.abort();
    }

    #[tokio::test]
    async fn test_own_echo_filter() {
        let a = Transport::bind(&loopback_config()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        a.subscribe(OpCode::Poll, move |received| {
            let _ = tx.send(received);
        });
        let receiver = a.clone();
        let handle = tokio::spawn(async move { receiver.receive_loop().await });

        a.send_poll(Some(a.local_addr())).await.unwrap();
        assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

        a.set_accept_own_broadcast(true);
        a.send_poll(Some(a.local_addr())).await.unwrap();
        let received = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.op_code, OpCode::Poll);

        handle.abort();
    }
}
