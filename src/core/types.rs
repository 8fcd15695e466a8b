use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Error, Result};

/// Hardware address of a remote node, the stable identity key once learned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Raw bytes as they appear on the wire
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&digits)
            .ok()
            .and_then(|bytes| <[u8; 6]>::try_from(bytes).ok())
            .ok_or_else(|| Error::config(format!("Invalid MAC address: {s}")))?;
        Ok(MacAddress(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Switches that promote per-packet log lines from debug to info
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IncomingLog {
    /// Log every ArtTrigger packet
    pub trigger: bool,
    /// Log every ArtDmx packet
    pub dmx: bool,
    /// Log every ArtCommand packet
    pub command: bool,
    /// Log every ArtPollReply packet
    pub poll_reply: bool,
}

/// Settings used when this process answers as an Art-Net node itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Answer ArtPoll and PING requests
    pub enabled: bool,
    /// Short name reported in ArtPollReply
    pub short_name: String,
    /// Long name reported in ArtPollReply
    pub long_name: String,
    /// Node report reported in ArtPollReply
    pub node_report: String,
    /// MAC address reported in ArtPollReply
    pub mac: MacAddress,
    /// IP reported in ArtPollReply, detected when unset
    pub ip: Option<Ipv4Addr>,
    /// Upper bound of the random delay before answering a poll
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub max_reply_delay: Duration,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        ResponderConfig {
            enabled: false,
            short_name: "Unnamed Node".to_string(),
            long_name: "This is an unnamed node".to_string(),
            node_report: "#0001 [0000] Missing node report".to_string(),
            mac: MacAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
            ip: None,
            max_reply_delay: Duration::from_secs(1),
        }
    }
}

/// Configuration for the Art-Net engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local address to bind to
    pub bind_addr: SocketAddr,
    /// Destination for broadcasts; its port is used for unicast sends too
    pub broadcast_addr: SocketAddr,
    /// Interval between ArtPoll cycles
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_interval: Duration,
    /// How long replies are collected after each ArtPoll
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_reply_window: Duration,
    /// Consecutive missed replies before a node is considered lost
    pub missed_reply_limit: u32,
    /// Sequence numbers below this value are accepted as wraparound
    pub sequence_window: u8,
    /// How often an outgoing DMX frame is sent
    pub retransmit_count: u32,
    /// Pause between retransmissions
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub retransmit_interval: Duration,
    /// Process packets echoed back from our own broadcasts
    pub accept_own_broadcast: bool,
    /// Per-opcode logging switches
    pub log_incoming: IncomingLog,
    /// Node-side behaviour
    pub responder: ResponderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], super::ART_NET_PORT)),
            broadcast_addr: SocketAddr::from(([255, 255, 255, 255], super::ART_NET_PORT)),
            poll_interval: Duration::from_secs(60),
            poll_reply_window: Duration::from_secs(3),
            missed_reply_limit: super::MISSED_REPLY_LIMIT,
            sequence_window: super::SEQUENCE_WINDOW,
            retransmit_count: 3,
            retransmit_interval: Duration::from_millis(500),
            accept_own_broadcast: false,
            log_incoming: IncomingLog::default(),
            responder: ResponderConfig::default(),
        }
    }
}

impl Config {
    /// Parses a TOML document, filling unspecified fields with defaults
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Checks that the configuration is consistent
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::config("Poll interval must be positive"));
        }
        if self.poll_reply_window.is_zero() {
            return Err(Error::config("Poll reply window must be positive"));
        }
        if self.poll_reply_window > self.poll_interval {
            return Err(Error::config("Poll reply window exceeds the poll interval"));
        }
        if self.missed_reply_limit == 0 {
            return Err(Error::config("Missed reply limit must be at least 1"));
        }
        if self.sequence_window >= 128 {
            return Err(Error::config("Sequence window must be below 128"));
        }
        if self.retransmit_count == 0 {
            return Err(Error::config("Retransmit count must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parsing() {
        let mac: MacAddress = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.octets(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");

        let dashed: MacAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(dashed, mac);

        assert!("aa:bb:cc".parse::<MacAddress>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddress>().is_err());
        assert!("aabbccddeef".parse::<MacAddress>().is_err());

        let bare: MacAddress = "0200000000ff".parse().unwrap();
        assert_eq!(bare.octets(), [0x02, 0, 0, 0, 0, 0xff]);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr.port(), 6454);
        assert_eq!(config.missed_reply_limit, 3);
        assert_eq!(config.sequence_window, 16);
    }

    #[test]
    fn test_config_from_toml() {
        let config = Config::from_toml_str(
            r#"
            broadcast_addr = "10.0.0.255:6454"
            poll_interval = 10.0
            poll_reply_window = 1.5

            [responder]
            enabled = true
            short_name = "stage-left"
            mac = "02:00:00:00:00:2a"
            "#,
        )
        .unwrap();

        assert_eq!(config.broadcast_addr, "10.0.0.255:6454".parse().unwrap());
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.poll_reply_window, Duration::from_millis(1500));
        assert!(config.responder.enabled);
        assert_eq!(config.responder.short_name, "stage-left");
        assert_eq!(config.responder.mac.octets()[5], 0x2a);
        // Untouched fields keep their defaults
        assert_eq!(config.retransmit_count, 3);
    }

    #[test]
    fn test_config_validation() {
        let result = Config::from_toml_str("poll_interval = 1.0\npoll_reply_window = 2.0");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Config::from_toml_str("missed_reply_limit = 0");
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Config::from_toml_str("bind_addr = 12");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
