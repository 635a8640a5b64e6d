//! UDP header codec.
//!
//! Eight bytes, big-endian fields, checksum emitted as zero.  The payload
//! length on ingress comes from the UDP length field, not from the frame
//! size, so trailing Ethernet padding is ignored.

use crate::UDP_HEADER_LEN;

/// Decoded fields of a received UDP header.
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub payload_len: usize,
}

/// Parse the UDP header at the start of `data` (the IPv4 payload).
///
/// Returns `None` when the header is truncated or the length field names
/// more payload than the frame actually carries.
pub fn parse(data: &[u8]) -> Option<UdpHeader> {
    if data.len() < UDP_HEADER_LEN {
        return None;
    }
    let length = u16::from_be_bytes([data[4], data[5]]) as usize;
    if length < UDP_HEADER_LEN || length > data.len() {
        return None;
    }
    Some(UdpHeader {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        payload_len: length - UDP_HEADER_LEN,
    })
}

/// Encode an egress UDP header into `buf` (at least 8 bytes).
pub fn encode_header(buf: &mut [u8], src_port: u16, dst_port: u16, payload_len: u16) {
    buf[0..2].copy_from_slice(&src_port.to_be_bytes());
    buf[2..4].copy_from_slice(&dst_port.to_be_bytes());
    buf[4..6].copy_from_slice(&(UDP_HEADER_LEN as u16 + payload_len).to_be_bytes());
    buf[6..8].fill(0);
}
