//! Per-identity protocol engine: receive dispatch, egress pipeline, ARP
//! decay.
//!
//! A controller owns one MAC driver, one IPv4 identity and one ARP table.
//! The receive phase drains at most one frame from the driver and
//! dispatches it by EtherType; the transmit phase emits at most one queued
//! message per port through the ARP gate; the decay phase sweeps the ARP
//! table under a one-second cooldown.  All phases are driven from the
//! stack's cooperative main cycle.

use log::debug;

use crate::driver::{Clock, MacDriver};
use crate::icmp::{self, EchoState};
use crate::port::Port;
use crate::stack::{CtrlConfig, ErrorHook};
use crate::types::{CtrlId, EtherType, IpProtocol, Ipv4Addr, MacAddr, NetError};
use crate::{
    ETH_HEADER_LEN, ETHERTYPE_IPV4, ICMP_ECHO_REPLY, ICMP_ECHO_REQUEST, IPV4_HEADER_LEN,
    NET_HEADER_LEN, UDP_HEADER_LEN, arp, ipv4, udp,
};

pub struct Controller<D> {
    pub(crate) driver: D,
    pub(crate) ip: Ipv4Addr,
    pub(crate) subnet_mask: Ipv4Addr,
    pub(crate) mac: MacAddr,
    pub(crate) arp: arp::ArpTable,
    /// Earliest time of the next decay sweep.
    next_decay_sweep: u32,
    pub(crate) echo: EchoState,
}

impl<D: MacDriver> Controller<D> {
    pub(crate) fn new(cfg: &CtrlConfig, mut driver: D) -> Self {
        driver.set_mac_addr(cfg.mac);
        Self {
            driver,
            ip: cfg.ip,
            subnet_mask: cfg.subnet_mask,
            mac: cfg.mac,
            arp: arp::ArpTable::with_capacity(cfg.arp_capacity),
            next_decay_sweep: 0,
            echo: EchoState::default(),
        }
    }

    #[inline]
    fn subnet_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::subnet_broadcast(self.ip, self.subnet_mask)
    }

    // =========================================================================
    // Receive phase
    // =========================================================================

    /// Dispatch one received frame.
    ///
    /// Malformed frames and unknown protocols are accepted-and-dropped;
    /// only failures that lose user data or exhaust the ARP table come
    /// back as errors.
    pub(crate) fn handle_frame(
        &mut self,
        clock: &impl Clock,
        ctrl_id: CtrlId,
        ports: &mut [Port],
        frame: &mut [u8],
        err: ErrorHook,
    ) -> Result<(), NetError> {
        if frame.len() < ETH_HEADER_LEN {
            return Ok(());
        }
        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
        match EtherType::from_u16(ethertype) {
            Some(EtherType::Arp) => self.handle_arp(clock.now_ms(), frame),
            Some(EtherType::Ipv4) => self.handle_ipv4(clock.now_ms(), ctrl_id, ports, frame, err),
            None => {
                debug!("rx: unknown ethertype 0x{:04x}, dropping", ethertype);
                Ok(())
            }
        }
    }

    fn handle_arp(&mut self, now: u32, frame: &mut [u8]) -> Result<(), NetError> {
        let Some(pkt) = arp::parse(&frame[ETH_HEADER_LEN..]) else {
            return Ok(());
        };
        // Off-subnet senders are ignored entirely.
        if !pkt.sender_ip.in_subnet(self.ip, self.subnet_mask) {
            return Ok(());
        }
        match pkt.operation {
            crate::ARP_OPER_REQUEST => {
                if pkt.target_ip != self.ip {
                    return Ok(());
                }
                debug!("arp: who-has {} from {}, replying", pkt.target_ip, pkt.sender_ip);
                arp::answer_request(frame, self.mac, self.ip);
                if self.driver.send_frame(frame) {
                    Ok(())
                } else {
                    Err(NetError::DriverRejected)
                }
            }
            crate::ARP_OPER_REPLY => {
                debug!("arp: {} is at {}", pkt.sender_ip, pkt.sender_mac);
                self.arp.store(pkt.sender_ip, pkt.sender_mac, false, now)
            }
            _ => Ok(()),
        }
    }

    fn handle_ipv4(
        &mut self,
        now: u32,
        ctrl_id: CtrlId,
        ports: &mut [Port],
        frame: &mut [u8],
        err: ErrorHook,
    ) -> Result<(), NetError> {
        let Some(hdr) = ipv4::parse(&frame[ETH_HEADER_LEN..]) else {
            return Ok(());
        };
        if !ipv4::accepts(&hdr, self.ip, self.subnet_mask) {
            return Ok(());
        }

        // Anything we accept refreshes the ARP table; learned peers age out.
        let src_mac = MacAddr([frame[6], frame[7], frame[8], frame[9], frame[10], frame[11]]);
        if self.arp.learn(hdr.src, src_mac, true, now).is_err() {
            debug!("arp: table full, cannot learn {}", hdr.src);
            err.raise();
        }

        match IpProtocol::from_u8(hdr.protocol) {
            Some(IpProtocol::Icmp) => self.handle_icmp(now, frame),
            Some(IpProtocol::Udp) => Self::deliver_udp(ctrl_id, ports, hdr.src, frame),
            None => {
                debug!("ipv4: unknown protocol {}, dropping", hdr.protocol);
                Ok(())
            }
        }
    }

    fn handle_icmp(&mut self, now: u32, frame: &mut [u8]) -> Result<(), NetError> {
        const L4_OFF: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN;
        if frame.len() < L4_OFF + 1 {
            return Ok(());
        }
        match frame[L4_OFF] {
            ICMP_ECHO_REQUEST => {
                if !icmp::answer_echo_request(frame, self.mac, self.ip) {
                    return Ok(());
                }
                if self.driver.send_frame(frame) {
                    Ok(())
                } else {
                    Err(NetError::DriverRejected)
                }
            }
            ICMP_ECHO_REPLY => {
                self.echo.note_reply(now);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Fan an inbound UDP payload out to every matching port.
    ///
    /// A port with insufficient room drops the message for itself only;
    /// the loss is reported, delivery to other ports is unaffected.
    fn deliver_udp(
        ctrl_id: CtrlId,
        ports: &mut [Port],
        src_ip: Ipv4Addr,
        frame: &[u8],
    ) -> Result<(), NetError> {
        const L4_OFF: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN;
        let Some(hdr) = udp::parse(&frame[L4_OFF..]) else {
            return Ok(());
        };
        let payload = &frame[L4_OFF + UDP_HEADER_LEN..L4_OFF + UDP_HEADER_LEN + hdr.payload_len];

        let mut dropped = false;
        for port in ports.iter_mut().filter(|p| {
            p.ctrl == ctrl_id && p.protocol == IpProtocol::Udp && p.local_port == hdr.dst_port
        }) {
            if port.deposit(payload, src_ip).is_err() {
                debug!(
                    "udp: port {} full, dropping {} bytes from {}",
                    hdr.dst_port,
                    payload.len(),
                    src_ip
                );
                dropped = true;
            }
        }
        if dropped {
            Err(NetError::QueueFull)
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Transmit phase
    // =========================================================================

    /// Emit at most one queued message from `port`.
    ///
    /// Resolution order: out-of-subnet destinations are discarded with an
    /// error; the subnet broadcast goes straight out; a valid ARP entry
    /// supplies the MAC; otherwise one throttled ARP request is emitted,
    /// and after [`arp::ARP_REQUEST_BUDGET`] unanswered requests the
    /// message is silently dropped.
    pub(crate) fn emit_port_message(
        &mut self,
        clock: &impl Clock,
        port: &mut Port,
        frame: &mut [u8],
    ) -> Result<(), NetError> {
        let Some((len, dest)) = port.next_tx_message() else {
            return Ok(());
        };

        if !dest.in_subnet(self.ip, self.subnet_mask) {
            debug!("tx: {} not on our subnet, discarding {} bytes", dest, len);
            port.consume_tx(len);
            return Err(NetError::Unreachable);
        }

        let resolved =
            dest == self.subnet_broadcast() || self.arp.lookup(dest).is_some_and(|e| e.is_valid());
        if !resolved {
            if clock.is_passed(port.arp_next_retry) {
                port.arp_retries += 1;
                port.arp_next_retry = clock.now_ms().wrapping_add(arp::ARP_REQUEST_COOLDOWN_MS);
                if port.arp_retries >= arp::ARP_REQUEST_BUDGET {
                    debug!(
                        "tx: no arp reply from {} after {} requests, dropping message",
                        dest,
                        arp::ARP_REQUEST_BUDGET
                    );
                    port.arp_retries = 0;
                    port.consume_tx(len);
                }
                self.request_arp(clock.now_ms(), dest)?;
            }
            return Ok(());
        }

        port.arp_retries = 0;
        if !port.tx_peek(&mut frame[NET_HEADER_LEN..NET_HEADER_LEN + len as usize]) {
            // Descriptor names more bytes than the ring holds.
            return Err(NetError::QueueEmpty);
        }
        udp::encode_header(
            &mut frame[ETH_HEADER_LEN + IPV4_HEADER_LEN..],
            port.local_port,
            port.remote_port,
            len,
        );
        self.emit_frame(dest, IpProtocol::Udp, UDP_HEADER_LEN as u16 + len, frame)?;
        port.consume_tx(len);
        Ok(())
    }

    /// Wrap an assembled L4 region in IPv4 and Ethernet headers and hand
    /// the frame to the driver.
    ///
    /// The destination MAC comes from the ARP table, or is the broadcast
    /// address for the subnet directed broadcast.
    fn emit_frame(
        &mut self,
        dest: Ipv4Addr,
        protocol: IpProtocol,
        l4_len: u16,
        frame: &mut [u8],
    ) -> Result<(), NetError> {
        let dst_mac = if dest == self.subnet_broadcast() {
            MacAddr::BROADCAST
        } else {
            self.arp
                .lookup(dest)
                .filter(|e| e.is_valid())
                .map(|e| e.mac)
                .ok_or(NetError::Unreachable)?
        };

        ipv4::encode_header(
            &mut frame[ETH_HEADER_LEN..],
            protocol.as_u8(),
            self.ip,
            dest,
            l4_len,
        );
        frame[0..6].copy_from_slice(&dst_mac.0);
        frame[6..12].copy_from_slice(&self.mac.0);
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        let total = ETH_HEADER_LEN + IPV4_HEADER_LEN + l4_len as usize;
        if self.driver.send_frame(&frame[..total]) {
            Ok(())
        } else {
            Err(NetError::DriverRejected)
        }
    }

    // =========================================================================
    // ARP operations
    // =========================================================================

    /// Emit a who-has request for `ip`, creating (or invalidating) its
    /// table entry.
    pub(crate) fn request_arp(&mut self, now: u32, ip: Ipv4Addr) -> Result<(), NetError> {
        self.arp.mark_requested(ip, now)?;
        debug!("arp: requesting {}", ip);
        let request = arp::build_request(self.mac, self.ip, ip);
        if self.driver.send_frame(&request) {
            Ok(())
        } else {
            Err(NetError::DriverRejected)
        }
    }

    /// Run the decay sweep if its cooldown has elapsed.
    pub(crate) fn decay_process(&mut self, clock: &impl Clock) {
        if !clock.is_passed(self.next_decay_sweep) {
            return;
        }
        let now = clock.now_ms();
        self.next_decay_sweep = now.wrapping_add(arp::ARP_SWEEP_COOLDOWN_MS);
        self.arp.sweep(now);
    }

    // =========================================================================
    // ICMP echo
    // =========================================================================

    /// Send an echo request to `dest`; the address must already be
    /// resolved (or be the subnet broadcast).
    pub(crate) fn send_ping(
        &mut self,
        now: u32,
        dest: Ipv4Addr,
        frame: &mut [u8],
    ) -> Result<(), NetError> {
        const L4_OFF: usize = ETH_HEADER_LEN + IPV4_HEADER_LEN;
        icmp::write_echo_request(&mut frame[L4_OFF..L4_OFF + icmp::ECHO_L4_LEN]);
        self.echo.begin(now);
        self.emit_frame(dest, IpProtocol::Icmp, icmp::ECHO_L4_LEN as u16, frame)
    }
}
