use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

use crate::core::{Result, ART_NET_PORT, PROTOCOL_VERSION};
use super::packet::{
    put_fixed_str, put_header, read_array, read_fixed_str, read_u16_be, ArtNetPacket, OpCode,
};

/// Reprograms names and port addresses of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub net_switch: u8,
    pub bind_index: u8,
    /// Empty leaves the name unchanged
    pub short_name: String,
    pub long_name: String,
    pub switch_in: [u8; 4],
    pub switch_out: [u8; 4],
    pub sub_switch: u8,
    pub acn_priority: u8,
    pub command: u8,
}

impl Default for Address {
    fn default() -> Self {
        // 0x7f means "no change" for the switch fields
        Address {
            net_switch: 0x7f,
            bind_index: 0,
            short_name: String::new(),
            long_name: String::new(),
            switch_in: [0x7f; 4],
            switch_out: [0x7f; 4],
            sub_switch: 0x7f,
            acn_priority: 0xff,
            command: 0,
        }
    }
}

impl ArtNetPacket for Address {
    const OP_CODE: OpCode = OpCode::Address;
    const MIN_LEN: usize = 107;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN {
            return None;
        }
        Some(Address {
            net_switch: data[12],
            bind_index: data[13],
            short_name: read_fixed_str(&data[14..32]),
            long_name: read_fixed_str(&data[32..96]),
            switch_in: read_array(data, 96),
            switch_out: read_array(data, 100),
            sub_switch: data[104],
            acn_priority: data[105],
            command: data[106],
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(Self::MIN_LEN);
        put_header(dst, Self::OP_CODE);
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u8(self.net_switch);
        dst.put_u8(self.bind_index);
        put_fixed_str(dst, &self.short_name, 18, 18);
        put_fixed_str(dst, &self.long_name, 64, 63);
        dst.put_slice(&self.switch_in);
        dst.put_slice(&self.switch_out);
        dst.put_u8(self.sub_switch);
        dst.put_u8(self.acn_priority);
        dst.put_u8(self.command);
        Ok(())
    }
}

/// Reprograms the IP settings of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpProg {
    /// Bit 7 enables programming, lower bits select the fields
    pub command: u8,
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub port: u16,
    pub gateway: Ipv4Addr,
}

impl Default for IpProg {
    fn default() -> Self {
        IpProg {
            command: 0,
            ip: Ipv4Addr::UNSPECIFIED,
            subnet_mask: Ipv4Addr::UNSPECIFIED,
            port: ART_NET_PORT,
            gateway: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl ArtNetPacket for IpProg {
    const OP_CODE: OpCode = OpCode::IpProg;
    const MIN_LEN: usize = 34;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN {
            return None;
        }
        Some(IpProg {
            command: data[14],
            ip: Ipv4Addr::from(read_array::<4>(data, 16)),
            subnet_mask: Ipv4Addr::from(read_array::<4>(data, 20)),
            port: read_u16_be(data, 24),
            gateway: Ipv4Addr::from(read_array::<4>(data, 26)),
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(Self::MIN_LEN);
        put_header(dst, Self::OP_CODE);
        dst.put_u16(PROTOCOL_VERSION);
        dst.put_u16(0);
        dst.put_u8(self.command);
        dst.put_u8(0);
        dst.put_slice(&self.ip.octets());
        dst.put_slice(&self.subnet_mask.octets());
        dst.put_u16(self.port);
        dst.put_slice(&self.gateway.octets());
        dst.put_bytes(0, 4);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let address = Address {
            short_name: "fog-1".to_string(),
            long_name: "Fog machine downstage".to_string(),
            command: 0x90,
            ..Address::default()
        };
        let bytes = address.pack().unwrap();
        assert_eq!(bytes.len(), 107);
        assert_eq!(&bytes[14..19], b"fog-1");
        assert_eq!(Address::parse(&bytes), Some(address));
        assert_eq!(Address::parse(&bytes[..106]), None);
    }

    #[test]
    fn test_ip_prog_round_trip() {
        let prog = IpProg {
            command: 0x80 | 0x04,
            ip: Ipv4Addr::new(2, 0, 0, 10),
            subnet_mask: Ipv4Addr::new(255, 0, 0, 0),
            port: 6454,
            gateway: Ipv4Addr::new(2, 0, 0, 1),
        };
        let bytes = prog.pack().unwrap();
        assert_eq!(bytes.len(), 34);
        assert_eq!(&bytes[16..20], &[2, 0, 0, 10]);
        assert_eq!(IpProg::parse(&bytes), Some(prog));
        assert_eq!(IpProg::parse(&bytes[..33]), None);
    }
}
