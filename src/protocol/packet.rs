use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::core::Result;
use super::address::{Address, IpProg};
use super::dmx::{Dmx, Nzs, Sync};
use super::poll::{Poll, PollReply};
use super::trigger::{Command, Trigger};

/// Magic preamble of every Art-Net packet
pub const ART_NET_HEADER: &[u8; 8] = b"Art-Net\0";

/// Length of magic plus opcode
pub const HEADER_LEN: usize = 10;

/// Largest payload carried by Dmx, Nzs, Trigger and Command packets
pub const MAX_DATA_LEN: usize = 512;

/// Opcodes understood by this implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum OpCode {
    Poll = 0x2000,
    PollReply = 0x2100,
    Command = 0x2400,
    Dmx = 0x5000,
    Nzs = 0x5100,
    Sync = 0x5200,
    Address = 0x6000,
    Trigger = 0x9900,
    IpProg = 0xf800,
}

impl OpCode {
    /// Looks up a raw opcode
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x2000 => Some(OpCode::Poll),
            0x2100 => Some(OpCode::PollReply),
            0x2400 => Some(OpCode::Command),
            0x5000 => Some(OpCode::Dmx),
            0x5100 => Some(OpCode::Nzs),
            0x5200 => Some(OpCode::Sync),
            0x6000 => Some(OpCode::Address),
            0x9900 => Some(OpCode::Trigger),
            0xf800 => Some(OpCode::IpProg),
            _ => None,
        }
    }

    /// Art-Net name of the opcode
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Poll => "ArtPoll",
            OpCode::PollReply => "ArtPollReply",
            OpCode::Command => "ArtCommand",
            OpCode::Dmx => "ArtDmx",
            OpCode::Nzs => "ArtNzs",
            OpCode::Sync => "ArtSync",
            OpCode::Address => "ArtAddress",
            OpCode::Trigger => "ArtTrigger",
            OpCode::IpProg => "ArtIpProg",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returns the opcode of a datagram, or `None` when it is not Art-Net
pub fn decode_header(data: &[u8]) -> Option<u16> {
    if data.len() < HEADER_LEN || &data[..8] != ART_NET_HEADER {
        return None;
    }
    Some(u16::from_le_bytes([data[8], data[9]]))
}

/// Binary layout shared by all packet types
pub trait ArtNetPacket: Sized {
    /// Opcode written into the header
    const OP_CODE: OpCode;

    /// Shortest datagram that can hold this packet
    const MIN_LEN: usize;

    /// Parses a full datagram including the header.
    ///
    /// Returns `None` for truncated or inconsistent input; never panics.
    fn parse(data: &[u8]) -> Option<Self>;

    /// Appends the full datagram including the header
    fn encode(&self, dst: &mut BytesMut) -> Result<()>;

    /// Builds the datagram
    fn pack(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(Self::MIN_LEN);
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }
}

/// Any parsed Art-Net packet
///
/// On the wire every packet opens with `Art-Net\0` and a little-endian
/// opcode; the payload layouts live in the sibling modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Poll(Poll),
    PollReply(PollReply),
    Dmx(Dmx),
    Nzs(Nzs),
    Sync(Sync),
    Trigger(Trigger),
    Command(Command),
    Address(Address),
    IpProg(IpProg),
}

impl Packet {
    /// Opcode of this packet
    pub fn op_code(&self) -> OpCode {
        match self {
            Packet::Poll(_) => OpCode::Poll,
            Packet::PollReply(_) => OpCode::PollReply,
            Packet::Dmx(_) => OpCode::Dmx,
            Packet::Nzs(_) => OpCode::Nzs,
            Packet::Sync(_) => OpCode::Sync,
            Packet::Trigger(_) => OpCode::Trigger,
            Packet::Command(_) => OpCode::Command,
            Packet::Address(_) => OpCode::Address,
            Packet::IpProg(_) => OpCode::IpProg,
        }
    }

    /// Validates the header and parses the payload
    pub fn parse(data: &[u8]) -> Option<Packet> {
        let op_code = OpCode::from_u16(decode_header(data)?)?;
        Self::parse_as(op_code, data)
    }

    /// Parses a datagram whose header was already checked
    pub fn parse_as(op_code: OpCode, data: &[u8]) -> Option<Packet> {
        match op_code {
            OpCode::Poll => Poll::parse(data).map(Packet::Poll),
            OpCode::PollReply => PollReply::parse(data).map(Packet::PollReply),
            OpCode::Dmx => Dmx::parse(data).map(Packet::Dmx),
            OpCode::Nzs => Nzs::parse(data).map(Packet::Nzs),
            OpCode::Sync => Sync::parse(data).map(Packet::Sync),
            OpCode::Trigger => Trigger::parse(data).map(Packet::Trigger),
            OpCode::Command => Command::parse(data).map(Packet::Command),
            OpCode::Address => Address::parse(data).map(Packet::Address),
            OpCode::IpProg => IpProg::parse(data).map(Packet::IpProg),
        }
    }

    /// Appends the encoded datagram
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        match self {
            Packet::Poll(p) => p.encode(dst),
            Packet::PollReply(p) => p.encode(dst),
            Packet::Dmx(p) => p.encode(dst),
            Packet::Nzs(p) => p.encode(dst),
            Packet::Sync(p) => p.encode(dst),
            Packet::Trigger(p) => p.encode(dst),
            Packet::Command(p) => p.encode(dst),
            Packet::Address(p) => p.encode(dst),
            Packet::IpProg(p) => p.encode(dst),
        }
    }
}

pub(crate) fn put_header(dst: &mut BytesMut, op_code: OpCode) {
    dst.put_slice(ART_NET_HEADER);
    dst.put_u16_le(op_code as u16);
}

pub(crate) fn read_u16_be(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

pub(crate) fn read_u16_le(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

pub(crate) fn read_array<const N: usize>(data: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[at..at + N]);
    out
}

/// Writes `s` as ASCII truncated to `max_len` and zero padded to `width`
pub(crate) fn put_fixed_str(dst: &mut BytesMut, s: &str, width: usize, max_len: usize) {
    let mut written = 0;
    for c in s.chars().take(max_len.min(width)) {
        dst.put_u8(if c.is_ascii() { c as u8 } else { b'?' });
        written += 1;
    }
    dst.put_bytes(0, width - written);
}

/// Reads a null terminated (or field-filling) string
pub(crate) fn read_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
