//! Application-visible endpoint multiplexed onto a controller.
//!
//! A port pairs an RX and a TX [`MsgQueue`] with the addressing state the
//! egress pipeline needs: the default peer, the local and remote port
//! numbers, and the per-destination ARP retry bookkeeping.  The queue
//! variant (datagram or stream) is frozen per direction at init.

use crate::MAX_UDP_PAYLOAD;
use crate::queue::MsgQueue;
use crate::stack::PortConfig;
use crate::types::{CtrlId, IpProtocol, Ipv4Addr, NetError};

pub struct Port {
    pub(crate) ctrl: CtrlId,
    pub(crate) protocol: IpProtocol,
    pub(crate) peer_ip: Ipv4Addr,
    pub(crate) local_port: u16,
    pub(crate) remote_port: u16,
    pub(crate) rx: MsgQueue,
    pub(crate) tx: MsgQueue,
    /// Requests already emitted for the pending destination.
    pub(crate) arp_retries: u8,
    /// Earliest time the next request may go out.
    pub(crate) arp_next_retry: u32,
}

impl Port {
    pub(crate) fn new(cfg: &PortConfig) -> Self {
        Self {
            ctrl: cfg.ctrl,
            protocol: cfg.protocol,
            peer_ip: cfg.peer_ip,
            local_port: cfg.local_port,
            remote_port: cfg.remote_port,
            rx: MsgQueue::new(cfg.rx_bytes_cap, cfg.rx_desc_cap),
            tx: MsgQueue::new(cfg.tx_bytes_cap, cfg.tx_desc_cap),
            arp_retries: 0,
            arp_next_retry: 0,
        }
    }

    // =========================================================================
    // Send side
    // =========================================================================

    /// Queue one outbound message.
    ///
    /// `dest` overrides the port's default peer for this message only; it
    /// is recorded in the descriptor and therefore ignored on a stream
    /// port.  Datagram messages are capped at one frame's payload.
    pub fn send_buffer(&mut self, data: &[u8], dest: Option<Ipv4Addr>) -> Result<(), NetError> {
        if !self.tx.is_stream() && data.len() > MAX_UDP_PAYLOAD {
            return Err(NetError::InvalidArgument);
        }
        self.tx
            .push_msg(data, dest.unwrap_or(Ipv4Addr::UNSPECIFIED))
    }

    /// Queue a single byte.
    pub fn send_byte(&mut self, data: u8, dest: Option<Ipv4Addr>) -> Result<(), NetError> {
        self.send_buffer(&[data], dest)
    }

    /// Queue the bytes of `s` (no terminator is sent).
    pub fn send_str(&mut self, s: &str, dest: Option<Ipv4Addr>) -> Result<(), NetError> {
        self.send_buffer(s.as_bytes(), dest)
    }

    /// Free space in the transmit queue, in bytes; 0 when the descriptor
    /// ring cannot take another message.
    pub fn tx_free_space(&self) -> u32 {
        self.tx.free_space()
    }

    pub fn is_tx_empty(&self) -> bool {
        self.tx.is_empty()
    }

    // =========================================================================
    // Receive side
    // =========================================================================

    pub fn is_rx_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Read one byte.  Only valid on a stream-mode RX queue.
    pub fn read_byte(&mut self) -> Result<u8, NetError> {
        if !self.rx.is_stream() {
            return Err(NetError::InvalidForMode);
        }
        let mut byte = [0u8];
        if self.rx.read_bytes(&mut byte, true) {
            Ok(byte[0])
        } else {
            Err(NetError::QueueEmpty)
        }
    }

    /// Read one message into `buf`.
    ///
    /// Datagram mode returns the message source address and refuses,
    /// without consuming, when `buf` is smaller than the head message.
    /// Stream mode returns up to `buf.len()` queued bytes and no address.
    pub fn read_buffer(&mut self, buf: &mut [u8]) -> Result<(usize, Option<Ipv4Addr>), NetError> {
        let (len, src) = self.rx.read_msg(buf)?;
        Ok((len as usize, src))
    }

    /// Deposit an inbound payload (controller side of the RX queue).
    pub(crate) fn deposit(&mut self, data: &[u8], src_ip: Ipv4Addr) -> Result<(), NetError> {
        self.rx.push_msg(data, src_ip)
    }

    // =========================================================================
    // Egress hooks
    // =========================================================================

    /// Size and destination of the next message to emit, if any.
    ///
    /// Datagram mode peeks the head descriptor and substitutes the port
    /// default for an all-zero destination; stream mode drains as much as
    /// one frame allows toward the default peer.
    pub(crate) fn next_tx_message(&self) -> Option<(u16, Ipv4Addr)> {
        let desc = self.tx.head_msg()?;
        let len = (desc.len as usize).min(MAX_UDP_PAYLOAD) as u16;
        let dest = if desc.ip.is_unspecified() {
            self.peer_ip
        } else {
            desc.ip
        };
        Some((len, dest))
    }

    /// Copy the head message's payload without consuming it.
    pub(crate) fn tx_peek(&mut self, dst: &mut [u8]) -> bool {
        self.tx.read_bytes(dst, false)
    }

    /// Drop the head message (sent, or given up on).
    pub(crate) fn consume_tx(&mut self, len: u16) {
        self.tx.consume_msg(len);
    }

    // =========================================================================
    // Addressing accessors
    // =========================================================================

    pub fn peer_ip(&self) -> Ipv4Addr {
        self.peer_ip
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }
}
