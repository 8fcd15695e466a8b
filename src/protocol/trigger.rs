use bytes::{BufMut, BytesMut};
use std::borrow::Cow;

use crate::core::{Error, Result, KEY_CONTROL_PANEL_PROTOCOL, PROTOCOL_VERSION};
use super::packet::{put_header, read_u16_be, ArtNetPacket, OpCode, MAX_DATA_LEN};
use super::poll::OEM_UNKNOWN;

/// Liveness check command
pub const PING: &str = "PING";

/// Answer to [`PING`]
pub const RETURN_PING: &str = "RETURN_PING";

/// Generic key/subkey trigger
///
/// Control panel nodes use Key 76 with the sequence number as SubKey and a
/// payload of the ASCII device name, a null byte, then the sensor data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub oem: u16,
    pub key: u8,
    pub sub_key: u8,
    pub data: Vec<u8>,
}

impl Trigger {
    pub fn new(key: u8, sub_key: u8, data: impl Into<Vec<u8>>) -> Self {
        Trigger {
            oem: OEM_UNKNOWN,
            key,
            sub_key,
            data: data.into(),
        }
    }

    /// Builds a control panel trigger for `device` tagged with `sequence`
    pub fn control_panel(device: &str, sequence: u8, payload: &[u8]) -> Self {
        let mut data = Vec::with_capacity(device.len() + 1 + payload.len());
        data.extend_from_slice(device.as_bytes());
        data.push(0);
        data.extend_from_slice(payload);
        Trigger::new(KEY_CONTROL_PANEL_PROTOCOL, sequence, data)
    }

    /// Splits a control panel payload into device name and sensor data.
    ///
    /// Returns `None` for other keys, a missing separator or a non-ASCII name.
    pub fn control_panel_payload(&self) -> Option<(&str, &[u8])> {
        if self.key != KEY_CONTROL_PANEL_PROTOCOL {
            return None;
        }
        let split = self.data.iter().position(|b| *b == 0)?;
        let name = std::str::from_utf8(&self.data[..split]).ok()?;
        if !name.is_ascii() {
            return None;
        }
        Some((name, &self.data[split + 1..]))
    }
}

impl ArtNetPacket for Trigger {
    const OP_CODE: OpCode = OpCode::Trigger;
    const MIN_LEN: usize = 18;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN || data.len() - Self::MIN_LEN > MAX_DATA_LEN {
            return None;
        }
        Some(Trigger {
            oem: read_u16_be(data, 14),
            key: data[16],
            sub_key: data[17],
            data: data[18..].to_vec(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(Error::protocol(format!(
                "Trigger payload too long: {} bytes (max {MAX_DATA_LEN})",
                self.data.len()
            )));
        }
        dst.reserve(Self::MIN_LEN + self.data.len());
        put_header(dst, Self::OP_CODE);
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u16(0);
        dst.put_u16(self.oem);
        dst.put_u8(self.key);
        dst.put_u8(self.sub_key);
        dst.put_slice(&self.data);
        Ok(())
    }
}

/// Text command such as `PING`, `STOP` or `RESET`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub esta_manufacturer: u16,
    /// Command bytes without the null terminator
    pub data: Vec<u8>,
}

impl Command {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Command {
            esta_manufacturer: 0,
            data: data.into(),
        }
    }

    /// Command as text, lossy for non-UTF-8 input
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn is(&self, command: &str) -> bool {
        self.data == command.as_bytes()
    }
}

impl ArtNetPacket for Command {
    const OP_CODE: OpCode = OpCode::Command;
    const MIN_LEN: usize = 16;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN {
            return None;
        }
        let length = read_u16_be(data, 14) as usize;
        if length > MAX_DATA_LEN || data.len() < Self::MIN_LEN + length {
            return None;
        }
        let mut payload = &data[16..16 + length];
        // Senders disagree on whether the length counts the terminator
        if let Some((0, rest)) = payload.split_last() {
            payload = rest;
        }
        Some(Command {
            esta_manufacturer: read_u16_be(data, 12),
            data: payload.to_vec(),
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let terminated = self.data.last() == Some(&0);
        let length = self.data.len() + usize::from(!terminated);
        if length > MAX_DATA_LEN {
            return Err(Error::protocol(format!(
                "Command too long: {length} bytes (max {MAX_DATA_LEN})"
            )));
        }
        dst.reserve(Self::MIN_LEN + length);
        put_header(dst, Self::OP_CODE);
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u16(self.esta_manufacturer);
        dst.put_u16(length as u16);
        dst.put_slice(&self.data);
        if !terminated {
            dst.put_u8(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_trigger_round_trip() {
        let trigger = Trigger::new(1, 2, b"abc".to_vec());
        let bytes = trigger.pack().unwrap();
        assert_eq!(bytes.len(), 21);
        assert_eq!(&bytes[8..10], &[0x00, 0x99]);
        assert_eq!(bytes[16], 1);
        assert_eq!(bytes[17], 2);
        assert_eq!(Trigger::parse(&bytes), Some(trigger));
        assert_eq!(Trigger::parse(&bytes[..17]), None);
    }

    #[test]
    fn test_control_panel_payload() {
        let trigger = Trigger::control_panel("button_1", 9, &[1]);
        assert_eq!(trigger.key, 76);
        assert_eq!(trigger.sub_key, 9);
        assert_eq!(&trigger.data, b"button_1\0\x01");
        assert_eq!(trigger.control_panel_payload(), Some(("button_1", &[1u8][..])));

        // Sensor data may itself contain nulls
        let trigger = Trigger::control_panel("fader", 1, &[0, 0x10]);
        assert_eq!(trigger.control_panel_payload(), Some(("fader", &[0u8, 0x10][..])));

        let other_key = Trigger::new(1, 0, b"a\0b".to_vec());
        assert_eq!(other_key.control_panel_payload(), None);

        let no_separator = Trigger::new(76, 0, b"abc".to_vec());
        assert_eq!(no_separator.control_panel_payload(), None);
    }

    #[test]
    fn test_trigger_too_long() {
        let trigger = Trigger::new(1, 0, vec![0; 513]);
        assert!(matches!(trigger.pack(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_command_length_includes_terminator() {
        let bytes = Command::new("PING").pack().unwrap();
        assert_eq!(&bytes[14..16], &[0x00, 0x05]);
        assert_eq!(&bytes[16..], b"PING\0");

        let parsed = Command::parse(&bytes).unwrap();
        assert!(parsed.is(PING));
        assert_eq!(parsed.text(), "PING");

        // Already terminated input is not terminated twice
        let bytes = Command::new(b"STOP\0".to_vec()).pack().unwrap();
        assert_eq!(&bytes[16..], b"STOP\0");
    }

    #[test]
    fn test_command_length_without_terminator() {
        let mut bytes = Command::new(RETURN_PING).pack().unwrap().to_vec();
        // Length excluding the terminator, as some nodes send it
        bytes[15] = RETURN_PING.len() as u8;
        let parsed = Command::parse(&bytes).unwrap();
        assert!(parsed.is(RETURN_PING));
    }

    #[test]
    fn test_command_limits() {
        assert!(Command::new(vec![b'a'; 511]).pack().is_ok());
        assert!(matches!(Command::new(vec![b'a'; 512]).pack(), Err(Error::Protocol(_))));

        let bytes = Command::new("RESET").pack().unwrap();
        assert_eq!(Command::parse(&bytes[..bytes.len() - 1]), None);
        assert_eq!(Command::parse(&bytes[..15]), None);
    }

    proptest! {
        #[test]
        fn command_round_trip(text in "[A-Z_]{0,64}") {
            let command = Command::new(text.clone());
            let bytes = command.pack().unwrap();
            prop_assert_eq!(Command::parse(&bytes), Some(command));
        }

        #[test]
        fn parsers_never_panic(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            let _ = Trigger::parse(&data);
            let _ = Command::parse(&data);
        }
    }
}
