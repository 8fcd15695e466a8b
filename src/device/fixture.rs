use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{Error, Result};
use crate::network::{SharedRegistry, Transport};
use crate::protocol::{Sequence, MAX_DATA_LEN};

/// How often and how fast a DMX frame is repeated
#[derive(Debug, Clone, Copy)]
pub struct Retransmit {
    pub count: u32,
    pub interval: Duration,
}

impl Default for Retransmit {
    fn default() -> Self {
        Retransmit {
            count: 3,
            interval: Duration::from_millis(500),
        }
    }
}

struct Inner {
    name: String,
    universe: u16,
    channels: usize,
    /// Node the fixture is wired to
    node: String,
    sequence: Sequence,
    retransmit: Retransmit,
    transport: Transport,
    registry: SharedRegistry,
    runtime: Handle,
    /// Retransmission of the latest frame
    pending: Mutex<Option<JoinHandle<()>>>,
}

/// Output device driven with ArtDmx
///
/// Cheap to clone. Each frame is sent several times; a newer frame cancels
/// the retransmission of the previous one.
#[derive(Clone)]
pub struct Fixture {
    inner: Arc<Inner>,
}

impl Fixture {
    /// Creates a fixture; must be called inside a Tokio runtime
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        node: impl Into<String>,
        universe: u16,
        channels: usize,
        sequence: Sequence,
        retransmit: Retransmit,
        transport: Transport,
        registry: SharedRegistry,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::invalid_state(format!("Fixtures need a Tokio runtime: {}", e)))?;
        Ok(Fixture {
            inner: Arc::new(Inner {
                name: name.into(),
                universe,
                channels,
                node: node.into(),
                sequence,
                retransmit,
                transport,
                registry,
                runtime,
                pending: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn universe(&self) -> u16 {
        self.inner.universe
    }

    pub fn channels(&self) -> usize {
        self.inner.channels
    }

    pub fn node(&self) -> &str {
        &self.inner.node
    }

    pub fn sequence(&self) -> &Sequence {
        &self.inner.sequence
    }

    /// Sends a frame, replacing any frame still being retransmitted
    ///
    /// Callable from any thread.
    pub fn send_dmx(&self, data: &[u8]) -> Result<()> {
        if data.len() > self.inner.channels || data.len() > MAX_DATA_LEN {
            return Err(Error::protocol(format!(
                "Fixture '{}' has {} channels, got {} values",
                self.inner.name,
                self.inner.channels,
                data.len()
            )));
        }

        let seq = self.inner.sequence.increment();
        let target = self.target();
        let fixture = self.clone();
        let data = data.to_vec();

        let mut pending = self.inner.pending.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(
            self.inner
                .runtime
                .spawn(async move { fixture.retransmit(seq, data, target).await }),
        );
        Ok(())
    }

    /// Sends all channels at zero
    pub fn blackout(&self) -> Result<()> {
        self.send_dmx(&vec![0; self.inner.channels])
    }

    /// Address of the node from the latest poll reply, broadcast otherwise
    fn target(&self) -> Option<SocketAddr> {
        self.inner
            .registry
            .read()
            .get(&self.inner.node)
            .and_then(|node| node.addr())
    }

    async fn retransmit(self, seq: u8, data: Vec<u8>, target: Option<SocketAddr>) {
        let inner = &self.inner;
        for attempt in 0..inner.retransmit.count {
            if attempt > 0 {
                tokio::time::sleep(inner.retransmit.interval).await;
                let current = inner.sequence.current();
                if current != seq && inner.sequence.should_ignore(seq) {
                    debug!("Fixture '{}' frame {} superseded by {}", inner.name, seq, current);
                    return;
                }
            }
            if let Err(e) = inner.transport.send_dmx(inner.universe, seq, &data, target).await {
                warn!("Fixture '{}' failed to send DMX: {}", inner.name, e);
            }
        }
    }
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("name", &self.inner.name)
            .field("universe", &self.inner.universe)
            .field("channels", &self.inner.channels)
            .field("node", &self.inner.node)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Config;
    use crate::network::NodeRegistry;
    use crate::protocol::{OpCode, Packet};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    type Frames = mpsc::UnboundedReceiver<(u8, Vec<u8>)>;

    async fn setup(retransmit: Retransmit) -> (Fixture, Frames, JoinHandle<Result<()>>) {
        let receiver = Transport::bind(&Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Config::default()
        })
        .await
        .unwrap();
        let sender = Transport::bind(&Config {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            broadcast_addr: receiver.local_addr(),
            ..Config::default()
        })
        .await
        .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        receiver.subscribe(OpCode::Dmx, move |received| {
            if let Packet::Dmx(dmx) = received.packet {
                let _ = tx.send((dmx.sequence, dmx.data));
            }
        });
        let task = tokio::spawn(async move { receiver.receive_loop().await });

        let fixture = Fixture::new(
            "par_1",
            "esp-stage",
            7,
            4,
            Sequence::default(),
            retransmit,
            sender,
            NodeRegistry::default().into_shared(),
        )
        .unwrap();
        (fixture, rx, task)
    }

    #[tokio::test]
    async fn test_frame_is_retransmitted() {
        let (fixture, mut rx, task) = setup(Retransmit {
            count: 3,
            interval: Duration::from_millis(20),
        })
        .await;

        fixture.send_dmx(&[1, 2, 3, 4]).unwrap();
        for _ in 0..3 {
            let (seq, data) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert_eq!(seq, 2);
            assert_eq!(data, vec![1, 2, 3, 4]);
        }
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        task.abort();
    }

    #[tokio::test]
    async fn test_last_update_wins() {
        let (fixture, mut rx, task) = setup(Retransmit {
            count: 3,
            interval: Duration::from_millis(200),
        })
        .await;

        fixture.send_dmx(&[1]).unwrap();
        let (seq, _) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(seq, 2);

        fixture.blackout().unwrap();
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = timeout(Duration::from_millis(700), rx.recv()).await {
            frames.push(frame);
        }
        // Only the blackout frame is repeated
        assert_eq!(frames, vec![(3, vec![0; 4]); 3]);

        task.abort();
    }

    #[tokio::test]
    async fn test_too_many_channels() {
        let (fixture, _rx, task) = setup(Retransmit::default()).await;
        assert!(matches!(fixture.send_dmx(&[0; 5]), Err(Error::Protocol(_))));
        assert_eq!(fixture.sequence().current(), 1);
        task.abort();
    }
}
