//! Art-Net protocol implementation
//!
//! This module defines the Art-Net packet layouts, the datagram codec used on
//! the UDP socket and the sequence number guard.

mod address;
pub mod codec;
mod dmx;
pub mod packet;
mod poll;
pub mod sequence;
mod trigger;

pub use self::address::{Address, IpProg};
pub use self::codec::{ArtNetCodec, Datagram};
pub use self::dmx::{Dmx, Nzs, Sync, MAX_UNIVERSE};
pub use self::packet::{
    decode_header, ArtNetPacket, OpCode, Packet, ART_NET_HEADER, HEADER_LEN, MAX_DATA_LEN,
};
pub use self::poll::{Poll, PollReply, OEM_UNKNOWN, POLL_REPLY_LEN};
pub use self::sequence::{next_seq, prev_seq, should_ignore, Sequence, SequenceGuard};
pub use self::trigger::{Command, Trigger, PING, RETURN_PING};
