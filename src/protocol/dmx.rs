use bytes::{BufMut, BytesMut};

use crate::core::{Error, Result, PROTOCOL_VERSION};
use super::packet::{put_header, read_u16_be, read_u16_le, ArtNetPacket, OpCode, MAX_DATA_LEN};

/// Largest 15-bit Port-Address
pub const MAX_UNIVERSE: u16 = 0x7fff;

/// One frame of channel data for a universe
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dmx {
    /// 0 disables sequencing on the receiver
    pub sequence: u8,
    pub physical: u8,
    /// 15-bit Port-Address
    pub universe: u16,
    pub data: Vec<u8>,
}

/// Like [`Dmx`] but with a non-zero start code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nzs {
    pub sequence: u8,
    pub start_code: u8,
    pub universe: u16,
    pub data: Vec<u8>,
}

/// Latches previously sent frames on all receivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Sync {
    pub aux: u16,
}

fn check_frame(universe: u16, data: &[u8]) -> Result<()> {
    if universe > MAX_UNIVERSE {
        return Err(Error::protocol(format!("Universe {universe} exceeds 15 bits")));
    }
    if data.len() > MAX_DATA_LEN {
        return Err(Error::protocol(format!(
            "DMX data too long: {} bytes (max {MAX_DATA_LEN})",
            data.len()
        )));
    }
    Ok(())
}

fn encode_frame(dst: &mut BytesMut, op_code: OpCode, seq: u8, byte13: u8, universe: u16, data: &[u8]) -> Result<()> {
    check_frame(universe, data)?;
    dst.reserve(18 + data.len());
    put_header(dst, op_code);
    dst.put_u16(PROTOCOL_VERSION);
    dst.put_u8(seq);
    dst.put_u8(byte13);
    dst.put_u16_le(universe);
    dst.put_u16(data.len() as u16);
    dst.put_slice(data);
    Ok(())
}

/// Returns (sequence, byte 13, universe, data)
fn parse_frame(data: &[u8]) -> Option<(u8, u8, u16, Vec<u8>)> {
    if data.len() < 18 {
        return None;
    }
    let length = read_u16_be(data, 16) as usize;
    if length > MAX_DATA_LEN || data.len() < 18 + length {
        return None;
    }
    Some((
        data[12],
        data[13],
        read_u16_le(data, 14) & MAX_UNIVERSE,
        data[18..18 + length].to_vec(),
    ))
}

impl Dmx {
    pub fn new(universe: u16, sequence: u8, data: impl Into<Vec<u8>>) -> Self {
        Dmx {
            sequence,
            physical: 0,
            universe,
            data: data.into(),
        }
    }
}

impl ArtNetPacket for Dmx {
    const OP_CODE: OpCode = OpCode::Dmx;
    const MIN_LEN: usize = 18;

    fn parse(data: &[u8]) -> Option<Self> {
        let (sequence, physical, universe, data) = parse_frame(data)?;
        Some(Dmx {
            sequence,
            physical,
            universe,
            data,
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_frame(dst, Self::OP_CODE, self.sequence, self.physical, self.universe, &self.data)
    }
}

impl ArtNetPacket for Nzs {
    const OP_CODE: OpCode = OpCode::Nzs;
    const MIN_LEN: usize = 18;

    fn parse(data: &[u8]) -> Option<Self> {
        let (sequence, start_code, universe, data) = parse_frame(data)?;
        if start_code == 0 {
            return None;
        }
        Some(Nzs {
            sequence,
            start_code,
            universe,
            data,
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        if self.start_code == 0 {
            return Err(Error::protocol("ArtNzs requires a non-zero start code"));
        }
        encode_frame(dst, Self::OP_CODE, self.sequence, self.start_code, self.universe, &self.data)
    }
}

impl ArtNetPacket for Sync {
    const OP_CODE: OpCode = OpCode::Sync;
    const MIN_LEN: usize = 14;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN {
            return None;
        }
        Some(Sync {
            aux: read_u16_be(data, 12),
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        put_header(dst, Self::OP_CODE);
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u16(self.aux);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dmx_layout() {
        let dmx = Dmx::new(0x1234, 7, vec![255, 128, 0]);
        let bytes = dmx.pack().unwrap();

        assert_eq!(bytes.len(), 21);
        assert_eq!(&bytes[8..10], &[0x00, 0x50]);
        assert_eq!(&bytes[10..12], &[0x00, 0x0e]);
        assert_eq!(bytes[12], 7);
        // Universe little-endian, length big-endian
        assert_eq!(&bytes[14..16], &[0x34, 0x12]);
        assert_eq!(&bytes[16..18], &[0x00, 0x03]);
        assert_eq!(&bytes[18..], &[255, 128, 0]);

        assert_eq!(Dmx::parse(&bytes), Some(dmx));
    }

    #[test]
    fn test_dmx_limits() {
        assert!(Dmx::new(1, 1, vec![0; 512]).pack().is_ok());
        assert!(matches!(Dmx::new(1, 1, vec![0; 513]).pack(), Err(Error::Protocol(_))));
        assert!(matches!(Dmx::new(0x8000, 1, vec![0]).pack(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_dmx_declared_length_exceeds_data() {
        let mut bytes = Dmx::new(1, 1, vec![1, 2, 3, 4]).pack().unwrap().to_vec();
        bytes.truncate(20);
        assert_eq!(Dmx::parse(&bytes), None);
        assert_eq!(Dmx::parse(&bytes[..17]), None);
    }

    #[test]
    fn test_nzs_and_sync() {
        let nzs = Nzs {
            sequence: 3,
            start_code: 0xcc,
            universe: 9,
            data: vec![1, 2],
        };
        let bytes = nzs.pack().unwrap();
        assert_eq!(bytes[13], 0xcc);
        assert_eq!(Nzs::parse(&bytes), Some(nzs.clone()));

        let zero = Nzs { start_code: 0, ..nzs };
        assert!(zero.pack().is_err());

        let sync = Sync::default();
        let bytes = sync.pack().unwrap();
        assert_eq!(bytes.len(), 14);
        assert_eq!(Sync::parse(&bytes), Some(sync));
        assert_eq!(Sync::parse(&bytes[..13]), None);
    }

    proptest! {
        #[test]
        fn dmx_round_trip(universe in 0u16..=MAX_UNIVERSE, seq in any::<u8>(),
                          data in proptest::collection::vec(any::<u8>(), 0..=512)) {
            let dmx = Dmx::new(universe, seq, data);
            let bytes = dmx.pack().unwrap();
            prop_assert_eq!(Dmx::parse(&bytes), Some(dmx));
        }

        #[test]
        fn parsers_never_panic(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            let _ = Dmx::parse(&data);
            let _ = Nzs::parse(&data);
            let _ = Sync::parse(&data);
        }
    }
}
