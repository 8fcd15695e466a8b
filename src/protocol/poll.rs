use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;

use crate::core::{Error, MacAddress, Result, PROTOCOL_VERSION};
use super::packet::{
    put_fixed_str, put_header, read_array, read_fixed_str, read_u16_be, ArtNetPacket, OpCode,
};

/// OEM code "unknown"
pub const OEM_UNKNOWN: u16 = 0x00ff;

/// Total length of an ArtPollReply on the wire
pub const POLL_REPLY_LEN: usize = 239;

const SHORT_NAME_WIDTH: usize = 18;
const LONG_NAME_WIDTH: usize = 64;
const NODE_REPORT_WIDTH: usize = 64;

/// Discovery request, usually broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub protocol_version: u16,
    /// Talk-to-me flags
    pub flags: u8,
    pub diag_priority: u8,
    pub target_port_top: u16,
    pub target_port_bottom: u16,
    pub esta_manufacturer: u16,
    pub oem: u16,
}

impl Default for Poll {
    fn default() -> Self {
        Poll {
            protocol_version: PROTOCOL_VERSION,
            flags: 0,
            diag_priority: 0,
            target_port_top: 0,
            target_port_bottom: 0,
            esta_manufacturer: 0,
            oem: OEM_UNKNOWN,
        }
    }
}

impl ArtNetPacket for Poll {
    const OP_CODE: OpCode = OpCode::Poll;
    const MIN_LEN: usize = 22;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN {
            return None;
        }
        Some(Poll {
            protocol_version: read_u16_be(data, 10),
            flags: data[12],
            diag_priority: data[13],
            target_port_top: read_u16_be(data, 14),
            target_port_bottom: read_u16_be(data, 16),
            esta_manufacturer: read_u16_be(data, 18),
            oem: read_u16_be(data, 20),
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(Self::MIN_LEN);
        put_header(dst, Self::OP_CODE);
        dst.put_u16(self.protocol_version);
        dst.put_u8(self.flags);
        dst.put_u8(self.diag_priority);
        dst.put_u16(self.target_port_top);
        dst.put_u16(self.target_port_bottom);
        dst.put_u16(self.esta_manufacturer);
        dst.put_u16(self.oem);
        Ok(())
    }
}

/// Node self-description sent in answer to an ArtPoll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReply {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub version_info: u16,
    pub net_switch: u8,
    pub sub_switch: u8,
    pub oem: u16,
    pub ubea_version: u8,
    pub status1: u8,
    pub esta_manufacturer: u16,
    /// At most 18 characters survive packing
    pub short_name: String,
    /// At most 63 characters survive packing
    pub long_name: String,
    /// Free-form status text, shown as the node status
    pub node_report: String,
    pub num_ports: u16,
    pub port_types: [u8; 4],
    pub good_input: [u8; 4],
    pub good_output: [u8; 4],
    pub switch_in: [u8; 4],
    pub switch_out: [u8; 4],
    pub sw_video: u8,
    pub sw_macro: u8,
    pub sw_remote: u8,
    pub style: u8,
    /// Identity key of the node
    pub mac: MacAddress,
    pub bind_ip: Ipv4Addr,
    pub bind_index: u8,
    pub status2: u8,
}

impl PollReply {
    /// Builds a reply for a single-output node with the usual defaults
    pub fn new(
        ip: Ipv4Addr,
        port: u16,
        short_name: impl Into<String>,
        long_name: impl Into<String>,
        node_report: impl Into<String>,
        mac: MacAddress,
    ) -> Self {
        PollReply {
            ip,
            port,
            version_info: 1,
            net_switch: 0,
            sub_switch: 0,
            oem: OEM_UNKNOWN,
            ubea_version: 0,
            status1: 0xc0,
            esta_manufacturer: 0,
            short_name: short_name.into(),
            long_name: long_name.into(),
            node_report: node_report.into(),
            num_ports: 1,
            port_types: [0x80, 0, 0, 0],
            good_input: [0; 4],
            good_output: [0x80, 0, 0, 0],
            switch_in: [0; 4],
            switch_out: [0; 4],
            sw_video: 0,
            sw_macro: 0,
            sw_remote: 0,
            style: 0,
            mac,
            bind_ip: ip,
            bind_index: 1,
            status2: 0x08,
        }
    }
}

impl ArtNetPacket for PollReply {
    const OP_CODE: OpCode = OpCode::PollReply;
    // Older nodes omit the trailing filler
    const MIN_LEN: usize = 213;

    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_LEN {
            return None;
        }
        Some(PollReply {
            ip: Ipv4Addr::from(read_array::<4>(data, 10)),
            port: read_u16_be(data, 14),
            version_info: read_u16_be(data, 16),
            net_switch: data[18],
            sub_switch: data[19],
            oem: read_u16_be(data, 20),
            ubea_version: data[22],
            status1: data[23],
            esta_manufacturer: read_u16_be(data, 24),
            short_name: read_fixed_str(&data[26..44]),
            long_name: read_fixed_str(&data[44..108]),
            node_report: read_fixed_str(&data[108..172]),
            num_ports: read_u16_be(data, 172),
            port_types: read_array(data, 174),
            good_input: read_array(data, 178),
            good_output: read_array(data, 182),
            switch_in: read_array(data, 186),
            switch_out: read_array(data, 190),
            sw_video: data[194],
            sw_macro: data[195],
            sw_remote: data[196],
            style: data[200],
            mac: MacAddress(read_array(data, 201)),
            bind_ip: Ipv4Addr::from(read_array::<4>(data, 207)),
            bind_index: data[211],
            status2: data[212],
        })
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        dst.reserve(POLL_REPLY_LEN);
        put_header(dst, Self::OP_CODE);
        dst.put_slice(&self.ip.octets());
        dst.put_u16(self.port);
        dst.put_u16(self.version_info);
        dst.put_u8(self.net_switch);
        dst.put_u8(self.sub_switch);
        dst.put_u16(self.oem);
        dst.put_u8(self.ubea_version);
        dst.put_u8(self.status1);
        dst.put_u16(self.esta_manufacturer);
        put_fixed_str(dst, &self.short_name, SHORT_NAME_WIDTH, SHORT_NAME_WIDTH);
        put_fixed_str(dst, &self.long_name, LONG_NAME_WIDTH, LONG_NAME_WIDTH - 1);
        put_fixed_str(dst, &self.node_report, NODE_REPORT_WIDTH, NODE_REPORT_WIDTH);
        dst.put_u16(self.num_ports);
        dst.put_slice(&self.port_types);
        dst.put_slice(&self.good_input);
        dst.put_slice(&self.good_output);
        dst.put_slice(&self.switch_in);
        dst.put_slice(&self.switch_out);
        dst.put_u8(self.sw_video);
        dst.put_u8(self.sw_macro);
        dst.put_u8(self.sw_remote);
        dst.put_bytes(0, 3);
        dst.put_u8(self.style);
        dst.put_slice(&self.mac.octets());
        dst.put_slice(&self.bind_ip.octets());
        dst.put_u8(self.bind_index);
        dst.put_u8(self.status2);
        dst.put_bytes(0, 26);

        let written = dst.len() - start;
        if written != POLL_REPLY_LEN {
            return Err(Error::protocol(format!(
                "ArtPollReply encoded to {} bytes, expected {}",
                written, POLL_REPLY_LEN
            )));
        }
        Ok(())
    }
}
