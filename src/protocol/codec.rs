use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::core::{Error, MAX_PACKET_SIZE};
use super::packet::{decode_header, OpCode, Packet};

/// One validated Art-Net datagram, payload not yet parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Raw opcode, possibly unknown to us
    pub op_code: u16,
    /// Complete datagram including the header
    pub data: Bytes,
}

impl Datagram {
    /// Known opcode, if any
    pub fn known_op_code(&self) -> Option<OpCode> {
        OpCode::from_u16(self.op_code)
    }

    /// Parses the payload for a known opcode
    pub fn parse(&self) -> Option<Packet> {
        Packet::parse_as(self.known_op_code()?, &self.data)
    }
}

/// Datagram codec for Art-Net over UDP
///
/// Every call to `decode` consumes the whole buffer since one UDP datagram
/// holds exactly one packet. Buffers without a valid header yield `None`.
#[derive(Clone, Default)]
pub struct ArtNetCodec;

impl ArtNetCodec {
    /// Creates a new codec
    pub fn new() -> Self {
        ArtNetCodec
    }
}

impl Decoder for ArtNetCodec {
    type Item = Datagram;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let frame = src.split().freeze();
        if frame.len() > MAX_PACKET_SIZE {
            trace!("Dropping oversized datagram ({} bytes)", frame.len());
            return Ok(None);
        }

        match decode_header(&frame) {
            Some(op_code) => Ok(Some(Datagram { op_code, data: frame })),
            None => {
                trace!("Dropping datagram without Art-Net header ({} bytes)", frame.len());
                Ok(None)
            }
        }
    }
}

impl Encoder<Packet> for ArtNetCodec {
    type Error = Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ArtNetPacket, Command, Dmx, ART_NET_HEADER};

    #[test]
    fn test_codec_round_trip() {
        let mut codec = ArtNetCodec::new();
        let mut bytes = BytesMut::new();

        let packet = Packet::Dmx(Dmx::new(3, 1, vec![10, 20]));
        codec.encode(packet.clone(), &mut bytes).unwrap();

        let datagram = codec.decode(&mut bytes).unwrap().unwrap();
        assert!(bytes.is_empty());
        assert_eq!(datagram.op_code, 0x5000);
        assert_eq!(datagram.known_op_code(), Some(OpCode::Dmx));
        assert_eq!(datagram.parse(), Some(packet));

        // Buffer drained, nothing left to decode
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
    }

    #[test]
    fn test_codec_drops_garbage() {
        let mut codec = ArtNetCodec::new();
        let mut bytes = BytesMut::from(&b"not an art-net packet"[..]);
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
        assert!(bytes.is_empty());

        // decode_eof must not complain about leftovers
        let mut bytes = BytesMut::from(&b"Art"[..]);
        assert_eq!(codec.decode_eof(&mut bytes).unwrap(), None);
    }

    #[test]
    fn test_codec_keeps_unknown_opcodes() {
        let mut codec = ArtNetCodec::new();
        let mut bytes = BytesMut::from(&ART_NET_HEADER[..]);
        bytes.extend_from_slice(&[0x00, 0x97]);

        let datagram = codec.decode(&mut bytes).unwrap().unwrap();
        assert_eq!(datagram.op_code, 0x9700);
        assert_eq!(datagram.known_op_code(), None);
        assert_eq!(datagram.parse(), None);
    }

    #[test]
    fn test_codec_encode_error() {
        let mut codec = ArtNetCodec::new();
        let mut bytes = BytesMut::new();
        let packet = Packet::Command(Command::new(vec![b'x'; 600]));
        assert!(codec.encode(packet, &mut bytes).is_err());

        let ok = Command::new("STOP").pack().unwrap();
        let mut bytes = BytesMut::from(&ok[..]);
        assert!(codec.decode(&mut bytes).unwrap().is_some());
    }
}
