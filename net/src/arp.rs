//! ARP resolution cache and frame codec.
//!
//! The table is a fixed array of entries keyed by IPv4 address, sized at
//! controller init.  Entries move through a small lifecycle:
//!
//! - **requested**: a request went out, the MAC is not known yet;
//! - **valid**: the MAC is usable, refreshed by any traffic from that IP;
//! - **evicted**: a valid entry marked as decaying is cleared by the sweep
//!   once it has been quiet for [`ARP_DECAY_MS`].
//!
//! Entries learned opportunistically from inbound traffic decay; entries
//! pinned by the application or confirmed by a reply to our own request do
//! not.  A full table reports an error instead of evicting a valid entry.

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use etherlite_lib::time;
use log::debug;

use crate::types::{Ipv4Addr, MacAddr, NetError};
use crate::{
    ARP_HEADER_LEN, ARP_HLEN_ETHERNET, ARP_HTYPE_ETHERNET, ARP_OPER_REPLY, ARP_OPER_REQUEST,
    ARP_PLEN_IPV4, ARP_PTYPE_IPV4, ETH_HEADER_LEN, ETHERTYPE_ARP,
};

// =============================================================================
// Constants
// =============================================================================

/// Quiet time after which a decaying entry is evicted.
pub const ARP_DECAY_MS: u32 = 60_000;

/// Minimum interval between two decay sweeps of one controller.
pub const ARP_SWEEP_COOLDOWN_MS: u32 = 1_000;

/// Minimum interval between two requests for one failing destination.
pub const ARP_REQUEST_COOLDOWN_MS: u32 = 2_000;

/// Requests emitted for a destination before the queued message is dropped.
pub const ARP_REQUEST_BUDGET: u8 = 3;

// =============================================================================
// Entries
// =============================================================================

bitflags! {
    /// Status word of one ARP entry.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ArpFlags: u8 {
        /// The slot is occupied; all other fields are meaningful.
        const INITIALISED = 1 << 0;
        /// The MAC address is usable.
        const VALID = 1 << 1;
        /// A request was emitted for this address.
        const REQUESTED = 1 << 2;
        /// The entry ages out after [`ARP_DECAY_MS`] without traffic.
        const DECAYS = 1 << 3;
    }
}

/// One slot of the resolution cache.
#[derive(Clone, Copy, Default)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    /// Timestamp of the last traffic seen from `ip`.
    pub last_seen: u32,
    pub flags: ArpFlags,
}

impl ArpEntry {
    #[inline]
    pub fn is_initialised(&self) -> bool {
        self.flags.contains(ArpFlags::INITIALISED)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(ArpFlags::VALID)
    }
}

impl fmt::Debug for ArpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ArpEntry {{ {} -> {}, last_seen={}, {:?} }}",
            self.ip, self.mac, self.last_seen, self.flags
        )
    }
}

// =============================================================================
// Table
// =============================================================================

/// Fixed-capacity resolution cache owned by one controller.
pub struct ArpTable {
    entries: Vec<ArpEntry>,
}

impl ArpTable {
    /// Allocate a table of `capacity` free slots.
    pub fn with_capacity(capacity: u16) -> Self {
        Self {
            entries: alloc::vec![ArpEntry::default(); capacity as usize],
        }
    }

    /// Linear scan for an initialised entry matching `ip`.
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<&ArpEntry> {
        self.entries
            .iter()
            .find(|e| e.is_initialised() && e.ip == ip)
    }

    fn lookup_mut(&mut self, ip: Ipv4Addr) -> Option<&mut ArpEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.is_initialised() && e.ip == ip)
    }

    /// First free slot, or `ArpTableFull`; valid entries are never evicted.
    fn create_slot(&mut self) -> Result<&mut ArpEntry, NetError> {
        self.entries
            .iter_mut()
            .find(|e| !e.is_initialised())
            .ok_or(NetError::ArpTableFull)
    }

    /// `true` if the table holds a usable MAC for `ip`.
    pub fn is_valid(&self, ip: Ipv4Addr) -> bool {
        self.lookup(ip).is_some_and(|e| e.is_valid())
    }

    /// Record that a request is in flight for `ip`, creating the entry if
    /// needed and invalidating any stored MAC.
    pub fn mark_requested(&mut self, ip: Ipv4Addr, now: u32) -> Result<(), NetError> {
        if let Some(entry) = self.lookup_mut(ip) {
            entry.flags.remove(ArpFlags::VALID);
            entry.flags.insert(ArpFlags::REQUESTED);
            return Ok(());
        }
        let entry = self.create_slot()?;
        *entry = ArpEntry {
            ip,
            mac: MacAddr::ZERO,
            last_seen: now,
            flags: ArpFlags::INITIALISED | ArpFlags::REQUESTED,
        };
        Ok(())
    }

    /// Store a resolved mapping, completing a requested entry or creating a
    /// fresh one.  An already-valid entry is left untouched.
    pub fn store(
        &mut self,
        ip: Ipv4Addr,
        mac: MacAddr,
        decays: bool,
        now: u32,
    ) -> Result<(), NetError> {
        if let Some(entry) = self.lookup_mut(ip) {
            if !entry.is_valid() {
                entry.mac = mac;
                entry.last_seen = now;
                entry.flags.insert(ArpFlags::VALID);
                entry.flags.set(ArpFlags::DECAYS, decays);
            }
            return Ok(());
        }
        let entry = self.create_slot()?;
        let mut flags = ArpFlags::INITIALISED | ArpFlags::VALID | ArpFlags::REQUESTED;
        flags.set(ArpFlags::DECAYS, decays);
        *entry = ArpEntry {
            ip,
            mac,
            last_seen: now,
            flags,
        };
        Ok(())
    }

    /// Opportunistic update from observed traffic.
    ///
    /// Absent or unresolved entries are stored with the given decay
    /// behavior; a valid entry only has its timestamp refreshed and its
    /// MAC corrected, so a pinned entry stays pinned under traffic.
    pub fn learn(
        &mut self,
        ip: Ipv4Addr,
        mac: MacAddr,
        decays: bool,
        now: u32,
    ) -> Result<(), NetError> {
        if let Some(entry) = self.lookup_mut(ip)
            && entry.is_valid()
        {
            entry.last_seen = now;
            if entry.mac != mac {
                entry.mac = mac;
            }
            return Ok(());
        }
        self.store(ip, mac, decays, now)
    }

    /// Evict every valid decaying entry that has been quiet for
    /// [`ARP_DECAY_MS`].  The caller gates the sweep frequency.
    pub fn sweep(&mut self, now: u32) {
        for entry in &mut self.entries {
            if entry.flags.contains(ArpFlags::VALID | ArpFlags::DECAYS)
                && time::deadline_passed(now, entry.last_seen.wrapping_add(ARP_DECAY_MS))
            {
                debug!("arp: entry for {} decayed, evicting", entry.ip);
                *entry = ArpEntry::default();
            }
        }
    }
}

// =============================================================================
// Frame codec
// =============================================================================

/// Decoded fields of a received ARP frame.
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

/// Parse the ARP payload following the Ethernet header.
///
/// Returns `None` for truncated frames or non-Ethernet/IPv4 bindings.
pub fn parse(data: &[u8]) -> Option<ArpPacket> {
    if data.len() < ARP_HEADER_LEN {
        return None;
    }
    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    if htype != ARP_HTYPE_ETHERNET
        || ptype != ARP_PTYPE_IPV4
        || data[4] != ARP_HLEN_ETHERNET
        || data[5] != ARP_PLEN_IPV4
    {
        return None;
    }
    Some(ArpPacket {
        operation: u16::from_be_bytes([data[6], data[7]]),
        sender_mac: MacAddr([data[8], data[9], data[10], data[11], data[12], data[13]]),
        sender_ip: Ipv4Addr([data[14], data[15], data[16], data[17]]),
        target_ip: Ipv4Addr([data[24], data[25], data[26], data[27]]),
    })
}

/// Build a broadcast who-has request for `target_ip`.
pub fn build_request(
    our_mac: MacAddr,
    our_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> [u8; ETH_HEADER_LEN + ARP_HEADER_LEN] {
    let mut frame = [0u8; ETH_HEADER_LEN + ARP_HEADER_LEN];

    frame[0..6].copy_from_slice(&MacAddr::BROADCAST.0);
    frame[6..12].copy_from_slice(&our_mac.0);
    frame[12..14].copy_from_slice(&ETHERTYPE_ARP.to_be_bytes());

    let arp = &mut frame[ETH_HEADER_LEN..];
    arp[0..2].copy_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    arp[2..4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    arp[4] = ARP_HLEN_ETHERNET;
    arp[5] = ARP_PLEN_IPV4;
    arp[6..8].copy_from_slice(&ARP_OPER_REQUEST.to_be_bytes());
    arp[8..14].copy_from_slice(&our_mac.0);
    arp[14..18].copy_from_slice(&our_ip.0);
    arp[18..24].copy_from_slice(&MacAddr::ZERO.0);
    arp[24..28].copy_from_slice(&target_ip.0);

    frame
}

/// Rewrite a received who-has request into the matching reply, in place.
///
/// The requester becomes the target, the controller identity becomes the
/// sender, and the frame goes back at the length it arrived with.
pub fn answer_request(frame: &mut [u8], our_mac: MacAddr, our_ip: Ipv4Addr) {
    let (eth, arp) = frame.split_at_mut(ETH_HEADER_LEN);

    let requester_mac: [u8; 6] = eth[6..12].try_into().unwrap_or([0; 6]);
    eth[0..6].copy_from_slice(&requester_mac);
    eth[6..12].copy_from_slice(&our_mac.0);

    arp[6..8].copy_from_slice(&ARP_OPER_REPLY.to_be_bytes());
    let sender_mac: [u8; 6] = arp[8..14].try_into().unwrap_or([0; 6]);
    let sender_ip: [u8; 4] = arp[14..18].try_into().unwrap_or([0; 4]);
    arp[18..24].copy_from_slice(&sender_mac);
    arp[8..14].copy_from_slice(&our_mac.0);
    arp[24..28].copy_from_slice(&sender_ip);
    arp[14..18].copy_from_slice(&our_ip.0);
}
