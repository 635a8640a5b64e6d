//! Per-direction message queues backing a port.
//!
//! A queue is either *datagram* (a byte ring paired with a descriptor ring
//! that preserves message boundaries and the per-message peer address) or
//! *stream* (bytes only, no framing).  The variant is frozen at init by
//! the configured descriptor capacity; a zero capacity selects stream
//! mode.  Message insertion is atomic: either the bytes and the
//! descriptor both go in, or nothing does.

use etherlite_lib::ring_buffer::Ring;

use crate::types::{Ipv4Addr, NetError};

/// Boundary descriptor for one queued message.
///
/// On the TX side `ip` is the requested destination (all zeros meaning
/// "use the port default"); on the RX side it is the source address the
/// message arrived from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsgDesc {
    pub len: u16,
    pub ip: Ipv4Addr,
}

/// One direction of a port's buffering.
#[derive(Debug)]
pub enum MsgQueue {
    /// Boundary-preserving mode: one descriptor per complete message.
    Datagram { bytes: Ring<u8>, descs: Ring<MsgDesc> },
    /// Byte-oriented mode: no descriptors, no per-message metadata.
    Stream { bytes: Ring<u8> },
}

impl MsgQueue {
    /// Build a queue from configured capacities; `desc_cap == 0` selects
    /// stream mode.
    pub fn new(bytes_cap: u16, desc_cap: u16) -> Self {
        if desc_cap == 0 {
            Self::Stream {
                bytes: Ring::with_capacity(bytes_cap as u32),
            }
        } else {
            Self::Datagram {
                bytes: Ring::with_capacity(bytes_cap as u32),
                descs: Ring::with_capacity(desc_cap as u32),
            }
        }
    }

    #[inline]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }

    #[inline]
    fn bytes(&self) -> &Ring<u8> {
        match self {
            Self::Datagram { bytes, .. } | Self::Stream { bytes } => bytes,
        }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut Ring<u8> {
        match self {
            Self::Datagram { bytes, .. } | Self::Stream { bytes } => bytes,
        }
    }

    /// Queued byte count.
    #[inline]
    pub fn byte_count(&self) -> u32 {
        self.bytes().len()
    }

    /// Free byte space, or 0 when the descriptor ring cannot take another
    /// message.
    pub fn free_space(&self) -> u32 {
        match self {
            Self::Datagram { bytes, descs } => {
                if descs.is_full() {
                    0
                } else {
                    bytes.free_space()
                }
            }
            Self::Stream { bytes } => bytes.free_space(),
        }
    }

    /// A queue is empty when it holds no readable message: no bytes, or in
    /// datagram mode no completed descriptor.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Datagram { bytes, descs } => bytes.is_empty() || descs.is_empty(),
            Self::Stream { bytes } => bytes.is_empty(),
        }
    }

    /// Enqueue one message.  In datagram mode both rings are checked up
    /// front so a failure leaves the queue untouched.
    pub fn push_msg(&mut self, data: &[u8], ip: Ipv4Addr) -> Result<(), NetError> {
        match self {
            Self::Datagram { bytes, descs } => {
                if descs.is_full() || bytes.free_space() < data.len() as u32 {
                    return Err(NetError::QueueFull);
                }
                bytes.write(data);
                descs.push(MsgDesc {
                    len: data.len() as u16,
                    ip,
                });
                Ok(())
            }
            Self::Stream { bytes } => {
                if bytes.write(data) {
                    Ok(())
                } else {
                    Err(NetError::QueueFull)
                }
            }
        }
    }

    /// Peek the head message without consuming anything.
    ///
    /// Datagram mode returns the head descriptor; stream mode reports the
    /// whole queued byte run with an unspecified address.
    pub fn head_msg(&self) -> Option<MsgDesc> {
        match self {
            Self::Datagram { descs, .. } => descs.peek().copied(),
            Self::Stream { bytes } => {
                if bytes.is_empty() {
                    None
                } else {
                    Some(MsgDesc {
                        len: bytes.len().min(u16::MAX as u32) as u16,
                        ip: Ipv4Addr::UNSPECIFIED,
                    })
                }
            }
        }
    }

    /// Copy `dst.len()` bytes from the head of the byte ring; peek when
    /// `consume` is false.
    #[inline]
    pub fn read_bytes(&mut self, dst: &mut [u8], consume: bool) -> bool {
        self.bytes_mut().read(dst, consume)
    }

    /// Drop one message of `len` bytes (and its descriptor, in datagram
    /// mode) without copying it out.
    pub fn consume_msg(&mut self, len: u16) -> bool {
        match self {
            Self::Datagram { bytes, descs } => bytes.consume(len as u32) && descs.consume(1),
            Self::Stream { bytes } => bytes.consume(len as u32),
        }
    }

    /// Consuming read of one complete message into `dst`.
    ///
    /// Datagram mode refuses (`InvalidForMode`, nothing consumed) when
    /// `dst` is smaller than the head message, and returns the recorded
    /// peer address.  Stream mode reads up to `dst.len()` bytes and
    /// carries no address.
    pub fn read_msg(&mut self, dst: &mut [u8]) -> Result<(u16, Option<Ipv4Addr>), NetError> {
        match self {
            Self::Datagram { bytes, descs } => {
                let desc = *descs.peek().ok_or(NetError::QueueEmpty)?;
                if (dst.len() as u32) < desc.len as u32 {
                    return Err(NetError::InvalidForMode);
                }
                if !bytes.read(&mut dst[..desc.len as usize], true) {
                    return Err(NetError::QueueEmpty);
                }
                descs.consume(1);
                Ok((desc.len, Some(desc.ip)))
            }
            Self::Stream { bytes } => {
                let len = bytes.len().min(dst.len() as u32) as usize;
                bytes.read(&mut dst[..len], true);
                Ok((len as u16, None))
            }
        }
    }
}
