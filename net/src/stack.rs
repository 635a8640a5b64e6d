//! Owned stack facade: controllers and ports behind one object.
//!
//! `NetStack` holds the controller and port vectors (indexed by
//! [`CtrlId`] / [`PortId`]), the injected clock, the shared frame scratch
//! buffer and the error-notification hook.  Everything is constructed at
//! init from static descriptors; nothing allocates afterwards.  There is
//! no global state; pass the stack where it is needed.

extern crate alloc;

use alloc::vec::Vec;

use log::debug;

use crate::MAX_FRAME_LEN;
use crate::controller::Controller;
use crate::driver::{Clock, ErrorNotifyFn, MacDriver};
use crate::port::Port;
use crate::types::{CtrlId, IpProtocol, Ipv4Addr, MacAddr, NetError, PortId};

// =============================================================================
// Configuration
// =============================================================================

/// Stack-wide settings, fixed at init.
pub struct StackConfig {
    /// Module error code handed to the notification hook.
    pub err_code: u16,
    /// Number of controllers the stack will hold.
    pub ctrl_capacity: usize,
    /// Number of ports the stack will hold.
    pub port_capacity: usize,
    /// Optional notification hook for lost user data and table exhaustion.
    pub error_notify: Option<ErrorNotifyFn>,
}

/// Per-controller settings, fixed at init (IP/mask/MAC remain mutable at
/// runtime).
pub struct CtrlConfig {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    /// Slots in this controller's ARP table.
    pub arp_capacity: u16,
}

/// Per-port settings, fixed at init.
///
/// A zero descriptor capacity selects stream mode for that direction:
/// bytes only, no message boundaries, no per-message addresses.
pub struct PortConfig {
    pub ctrl: CtrlId,
    pub protocol: IpProtocol,
    pub peer_ip: Ipv4Addr,
    pub local_port: u16,
    pub remote_port: u16,
    pub rx_bytes_cap: u16,
    pub rx_desc_cap: u16,
    pub tx_bytes_cap: u16,
    pub tx_desc_cap: u16,
}

/// Error-notification capability threaded through the processing phases.
#[derive(Clone, Copy)]
pub(crate) struct ErrorHook {
    code: u16,
    notify: Option<ErrorNotifyFn>,
}

impl ErrorHook {
    pub(crate) fn raise(self) {
        if let Some(notify) = self.notify {
            notify(self.code);
        }
    }
}

// =============================================================================
// Stack
// =============================================================================

pub struct NetStack<D, C> {
    clock: C,
    err: ErrorHook,
    ctrl_capacity: usize,
    port_capacity: usize,
    ctrls: Vec<Controller<D>>,
    ports: Vec<Port>,
    /// Shared RX/TX frame assembly buffer.
    frame: Vec<u8>,
}

impl<D: MacDriver, C: Clock> NetStack<D, C> {
    /// Build an empty stack; controllers and ports are added afterwards,
    /// still during init.
    pub fn new(cfg: &StackConfig, clock: C) -> Self {
        Self {
            clock,
            err: ErrorHook {
                code: cfg.err_code,
                notify: cfg.error_notify,
            },
            ctrl_capacity: cfg.ctrl_capacity,
            port_capacity: cfg.port_capacity,
            ctrls: Vec::with_capacity(cfg.ctrl_capacity),
            ports: Vec::with_capacity(cfg.port_capacity),
            frame: alloc::vec![0u8; MAX_FRAME_LEN],
        }
    }

    /// Register a controller with its MAC driver.  The configured MAC is
    /// programmed into the device immediately.
    pub fn add_controller(&mut self, cfg: &CtrlConfig, driver: D) -> Result<CtrlId, NetError> {
        if self.ctrls.len() == self.ctrl_capacity {
            return Err(NetError::InvalidArgument);
        }
        self.ctrls.push(Controller::new(cfg, driver));
        Ok(CtrlId(self.ctrls.len() - 1))
    }

    /// Register a port.  The default peer must sit on the controller's
    /// subnet.
    pub fn add_port(&mut self, cfg: &PortConfig) -> Result<PortId, NetError> {
        if self.ports.len() == self.port_capacity {
            return Err(NetError::InvalidArgument);
        }
        let ctrl = self.ctrls.get(cfg.ctrl.0).ok_or(NetError::InvalidArgument)?;
        if !cfg.peer_ip.in_subnet(ctrl.ip, ctrl.subnet_mask) {
            return Err(NetError::InvalidArgument);
        }
        self.ports.push(Port::new(cfg));
        Ok(PortId(self.ports.len() - 1))
    }

    // =========================================================================
    // Main cycle
    // =========================================================================

    /// One cooperative cycle: receive, transmit, decay.
    pub fn poll(&mut self, ctrl: CtrlId) {
        self.rx_process(ctrl);
        self.tx_process(ctrl);
        self.arp_decay_process(ctrl);
    }

    /// Run one cycle for every controller, in id order.
    pub fn poll_all(&mut self) {
        for idx in 0..self.ctrls.len() {
            self.poll(CtrlId(idx));
        }
    }

    /// Receive phase: drain at most one inbound frame from the driver.
    pub fn rx_process(&mut self, ctrl: CtrlId) {
        let (ctrls, ports, frame, clock, err) = (
            &mut self.ctrls,
            &mut self.ports,
            &mut self.frame,
            &self.clock,
            self.err,
        );
        let Some(c) = ctrls.get_mut(ctrl.0) else {
            return;
        };
        if !c.driver.has_frame() {
            return;
        }
        let Some(len) = c.driver.recv_frame(frame) else {
            return;
        };
        let len = len.min(frame.len());
        if let Err(e) = c.handle_frame(clock, ctrl, ports, &mut frame[..len], err) {
            debug!("rx: frame processing failed: {}", e);
            err.raise();
        }
    }

    /// Transmit phase: one emission attempt per pending port of this
    /// controller, in port-id order.
    pub fn tx_process(&mut self, ctrl: CtrlId) {
        let (ctrls, ports, frame, clock, err) = (
            &mut self.ctrls,
            &mut self.ports,
            &mut self.frame,
            &self.clock,
            self.err,
        );
        let Some(c) = ctrls.get_mut(ctrl.0) else {
            return;
        };
        for port in ports.iter_mut().filter(|p| p.ctrl == ctrl) {
            if port.is_tx_empty() {
                continue;
            }
            if let Err(e) = c.emit_port_message(clock, port, frame) {
                debug!("tx: emission failed on port {}: {}", port.local_port, e);
                err.raise();
            }
        }
    }

    /// Decay phase: sweep the controller's ARP table (1 s cooldown).
    pub fn arp_decay_process(&mut self, ctrl: CtrlId) {
        let Some(c) = self.ctrls.get_mut(ctrl.0) else {
            return;
        };
        c.decay_process(&self.clock);
    }

    // =========================================================================
    // Controller operations
    // =========================================================================

    /// Insert an ARP mapping directly.  The address must be on the
    /// controller's subnet; `decays` selects whether the entry ages out.
    pub fn add_arp_entry(
        &mut self,
        ctrl: CtrlId,
        ip: Ipv4Addr,
        mac: MacAddr,
        decays: bool,
    ) -> Result<(), NetError> {
        let now = self.clock.now_ms();
        let c = self
            .ctrls
            .get_mut(ctrl.0)
            .ok_or(NetError::InvalidArgument)?;
        if !ip.in_subnet(c.ip, c.subnet_mask) {
            return Err(NetError::InvalidArgument);
        }
        c.arp.learn(ip, mac, decays, now)
    }

    /// Emit an ARP request for `ip` immediately, invalidating any cached
    /// mapping until the reply arrives.
    pub fn request_arp(&mut self, ctrl: CtrlId, ip: Ipv4Addr) -> Result<(), NetError> {
        let now = self.clock.now_ms();
        let c = self
            .ctrls
            .get_mut(ctrl.0)
            .ok_or(NetError::InvalidArgument)?;
        if !ip.in_subnet(c.ip, c.subnet_mask) {
            return Err(NetError::InvalidArgument);
        }
        c.request_arp(now, ip)
    }

    /// Whether the controller holds a usable MAC for `ip`.
    pub fn is_arp_valid(&self, ctrl: CtrlId, ip: Ipv4Addr) -> bool {
        self.ctrls
            .get(ctrl.0)
            .is_some_and(|c| c.arp.is_valid(ip))
    }

    /// Send an ICMP echo request to `ip` (the address must be resolved or
    /// be the subnet broadcast) and arm the round-trip latch.
    pub fn send_ping(&mut self, ctrl: CtrlId, ip: Ipv4Addr) -> Result<(), NetError> {
        let (ctrls, frame) = (&mut self.ctrls, &mut self.frame);
        let c = ctrls.get_mut(ctrl.0).ok_or(NetError::InvalidArgument)?;
        c.send_ping(self.clock.now_ms(), ip, frame)
    }

    /// Round-trip time of the last answered echo request, or `None` while
    /// no reply has arrived.
    pub fn ping_rtt(&self, ctrl: CtrlId) -> Option<u32> {
        self.ctrls.get(ctrl.0).and_then(|c| c.echo.rtt())
    }

    pub fn mac_addr(&self, ctrl: CtrlId) -> Option<MacAddr> {
        self.ctrls.get(ctrl.0).map(|c| c.mac)
    }

    /// Change the controller MAC and re-register it with the driver.
    pub fn set_mac_addr(&mut self, ctrl: CtrlId, mac: MacAddr) -> Result<(), NetError> {
        let c = self
            .ctrls
            .get_mut(ctrl.0)
            .ok_or(NetError::InvalidArgument)?;
        c.mac = mac;
        c.driver.set_mac_addr(mac);
        Ok(())
    }

    pub fn ip_addr(&self, ctrl: CtrlId) -> Option<Ipv4Addr> {
        self.ctrls.get(ctrl.0).map(|c| c.ip)
    }

    pub fn set_ip_addr(&mut self, ctrl: CtrlId, ip: Ipv4Addr) -> Result<(), NetError> {
        let c = self
            .ctrls
            .get_mut(ctrl.0)
            .ok_or(NetError::InvalidArgument)?;
        c.ip = ip;
        Ok(())
    }

    pub fn subnet_mask(&self, ctrl: CtrlId) -> Option<Ipv4Addr> {
        self.ctrls.get(ctrl.0).map(|c| c.subnet_mask)
    }

    pub fn set_subnet_mask(&mut self, ctrl: CtrlId, mask: Ipv4Addr) -> Result<(), NetError> {
        let c = self
            .ctrls
            .get_mut(ctrl.0)
            .ok_or(NetError::InvalidArgument)?;
        c.subnet_mask = mask;
        Ok(())
    }

    // =========================================================================
    // Port operations
    // =========================================================================

    fn port(&self, port: PortId) -> Option<&Port> {
        self.ports.get(port.0)
    }

    fn port_mut(&mut self, port: PortId) -> Result<&mut Port, NetError> {
        self.ports.get_mut(port.0).ok_or(NetError::InvalidArgument)
    }

    /// Free space in the port's transmit queue, in bytes.
    pub fn tx_free_space(&self, port: PortId) -> u32 {
        self.port(port).map_or(0, Port::tx_free_space)
    }

    pub fn is_tx_empty(&self, port: PortId) -> bool {
        self.port(port).is_none_or(Port::is_tx_empty)
    }

    pub fn is_rx_empty(&self, port: PortId) -> bool {
        self.port(port).is_none_or(Port::is_rx_empty)
    }

    /// Queue one byte for transmission.
    pub fn send_byte(
        &mut self,
        port: PortId,
        data: u8,
        dest: Option<Ipv4Addr>,
    ) -> Result<(), NetError> {
        self.port_mut(port)?.send_byte(data, dest)
    }

    /// Queue the bytes of `s` for transmission (no terminator is sent).
    pub fn send_str(
        &mut self,
        port: PortId,
        s: &str,
        dest: Option<Ipv4Addr>,
    ) -> Result<(), NetError> {
        self.port_mut(port)?.send_str(s, dest)
    }

    /// Queue a buffer for transmission.
    pub fn send_buffer(
        &mut self,
        port: PortId,
        data: &[u8],
        dest: Option<Ipv4Addr>,
    ) -> Result<(), NetError> {
        self.port_mut(port)?.send_buffer(data, dest)
    }

    /// Read one byte from a stream-mode port.
    pub fn read_byte(&mut self, port: PortId) -> Result<u8, NetError> {
        self.port_mut(port)?.read_byte()
    }

    /// Read one message; see [`Port::read_buffer`].
    pub fn read_buffer(
        &mut self,
        port: PortId,
        buf: &mut [u8],
    ) -> Result<(usize, Option<Ipv4Addr>), NetError> {
        self.port_mut(port)?.read_buffer(buf)
    }

    pub fn peer_ip(&self, port: PortId) -> Option<Ipv4Addr> {
        self.port(port).map(Port::peer_ip)
    }

    /// Change the port's default peer; it must sit on the bound
    /// controller's subnet.
    pub fn set_peer_ip(&mut self, port: PortId, ip: Ipv4Addr) -> Result<(), NetError> {
        let ctrl = {
            let p = self.ports.get(port.0).ok_or(NetError::InvalidArgument)?;
            p.ctrl
        };
        let c = self.ctrls.get(ctrl.0).ok_or(NetError::InvalidArgument)?;
        if !ip.in_subnet(c.ip, c.subnet_mask) {
            return Err(NetError::InvalidArgument);
        }
        self.ports[port.0].peer_ip = ip;
        Ok(())
    }

    pub fn local_port(&self, port: PortId) -> Option<u16> {
        self.port(port).map(Port::local_port)
    }

    pub fn set_local_port(&mut self, port: PortId, nb: u16) -> Result<(), NetError> {
        self.port_mut(port)?.local_port = nb;
        Ok(())
    }

    pub fn remote_port(&self, port: PortId) -> Option<u16> {
        self.port(port).map(Port::remote_port)
    }

    pub fn set_remote_port(&mut self, port: PortId, nb: u16) -> Result<(), NetError> {
        self.port_mut(port)?.remote_port = nb;
        Ok(())
    }
}
