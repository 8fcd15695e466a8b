use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{info, trace, warn};

use crate::core::{Error, Result};
use crate::protocol::PING;
use crate::util::{duration_to_millis, median};
use super::transport::Transport;

/// Pause between consecutive pings
const PING_SPACING: Duration = Duration::from_millis(10);

/// Minimum attempts before a mostly failing run is aborted
const ABORT_MIN_ATTEMPTS: usize = 5;

/// A RETURN_PING as seen by the inbound router
#[derive(Debug, Clone, Copy)]
pub struct PingReply {
    pub from: SocketAddr,
    pub at: Instant,
}

/// Outcome of a ping run
#[derive(Debug, Clone, PartialEq)]
pub struct PingReport {
    pub target: SocketAddr,
    /// Round-trip times, `None` for timeouts
    pub samples: Vec<Option<Duration>>,
    /// Stopped early because most pings timed out
    pub aborted: bool,
}

impl PingReport {
    fn new(target: SocketAddr) -> Self {
        PingReport {
            target,
            samples: Vec::new(),
            aborted: false,
        }
    }

    pub fn sent(&self) -> usize {
        self.samples.len()
    }

    pub fn received(&self) -> usize {
        self.samples.iter().filter(|s| s.is_some()).count()
    }

    pub fn timeouts(&self) -> usize {
        self.sent() - self.received()
    }

    fn finite(&self) -> impl Iterator<Item = Duration> + '_ {
        self.samples.iter().flatten().copied()
    }

    pub fn average(&self) -> Option<Duration> {
        let received = self.received() as u32;
        (received > 0).then(|| self.finite().sum::<Duration>() / received)
    }

    pub fn median(&self) -> Option<Duration> {
        let secs: Vec<f64> = self.finite().map(|d| d.as_secs_f64()).collect();
        median(&secs).map(Duration::from_secs_f64)
    }

    pub fn min(&self) -> Option<Duration> {
        self.finite().min()
    }

    pub fn max(&self) -> Option<Duration> {
        self.finite().max()
    }
}

impl fmt::Display for PingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Option<Duration>| match d {
            Some(d) => format!("{:.0}", duration_to_millis(d)),
            None => "∞".to_string(),
        };
        write!(
            f,
            "Received {}/{} pings from {}. Average/Median/Min/Max response times: {}/{}/{}/{}ms",
            self.received(),
            self.sent(),
            self.target,
            ms(self.average()),
            ms(self.median()),
            ms(self.min()),
            ms(self.max()),
        )?;
        if self.aborted {
            f.write_str(" (aborted)")?;
        }
        Ok(())
    }
}

/// Measures round-trip times with PING / RETURN_PING commands
pub struct Pinger {
    transport: Transport,
    /// Held for a whole run so concurrent runs do not steal replies
    replies: Mutex<mpsc::UnboundedReceiver<PingReply>>,
}

impl Pinger {
    pub fn new(transport: Transport, replies: mpsc::UnboundedReceiver<PingReply>) -> Self {
        Pinger {
            transport,
            replies: Mutex::new(replies),
        }
    }

    /// Sends `count` pings to `target`, waiting up to `timeout` for each
    pub async fn ping(&self, target: SocketAddr, count: u32, timeout: Duration) -> Result<PingReport> {
        let mut replies = self.replies.lock().await;
        let mut report = PingReport::new(target);
        info!("Sending {} pings to {}...", count, target);

        for _ in 0..count {
            while replies.try_recv().is_ok() {}

            let start = Instant::now();
            let rtt = match self.transport.send_command(PING.as_bytes(), Some(target)).await {
                Ok(()) => self.await_reply(&mut replies, target, start + timeout).await?,
                Err(e) => {
                    warn!("Failed to send PING to {}: {}", target, e);
                    None
                }
            }
            .map(|at| at.saturating_duration_since(start));
            report.samples.push(rtt);

            if rtt.is_none()
                && report.timeouts() > report.sent() / 2
                && report.sent() >= ABORT_MIN_ATTEMPTS
            {
                warn!(
                    "Timed out {} / {} times. Aborting.",
                    report.timeouts(),
                    report.sent()
                );
                report.aborted = true;
                break;
            }

            sleep(PING_SPACING).await;
        }

        info!("{}", report);
        Ok(report)
    }

    /// Waits for a RETURN_PING from `target`, `None` on timeout
    async fn await_reply(
        &self,
        replies: &mut mpsc::UnboundedReceiver<PingReply>,
        target: SocketAddr,
        deadline: Instant,
    ) -> Result<Option<Instant>> {
        loop {
            match timeout_at(deadline, replies.recv()).await {
                Ok(Some(reply)) if reply.from.ip() == target.ip() => return Ok(Some(reply.at)),
                Ok(Some(reply)) => trace!("Ignoring RETURN_PING from {}", reply.from),
                Ok(None) => return Err(Error::invalid_state("Ping reply channel closed")),
                Err(_) => return Ok(None),
            }
        }
    }
}
