//! Fixed-capacity ring buffer of `Copy` items.
//!
//! Backing storage is allocated once at construction and never resized.
//! Occupancy is tracked with free-running 32-bit read/write totals, so
//! `len = write_total - read_total` stays correct across counter wrap
//! (modular unsigned subtraction).  All operations are all-or-nothing: a
//! write that does not fit, or a read of more items than are queued, fails
//! without touching the buffer.

extern crate alloc;

use alloc::vec::Vec;

#[derive(Debug)]
pub struct Ring<T> {
    data: Vec<T>,
    read_idx: u32,
    write_idx: u32,
    read_total: u32,
    write_total: u32,
}

impl<T: Copy + Default> Ring<T> {
    /// Create a ring holding up to `capacity` items.
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            data: alloc::vec![T::default(); capacity as usize],
            read_idx: 0,
            write_idx: 0,
            read_total: 0,
            write_total: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    /// Number of items currently queued.
    #[inline]
    pub fn len(&self) -> u32 {
        self.write_total.wrapping_sub(self.read_total)
    }

    /// Number of items that can still be written.
    #[inline]
    pub fn free_space(&self) -> u32 {
        self.capacity() - self.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_space() == 0
    }

    /// Append all of `src`, or nothing.  Returns `false` when the free
    /// space is insufficient.
    pub fn write(&mut self, src: &[T]) -> bool {
        let n = src.len() as u32;
        if self.free_space() < n {
            return false;
        }
        if n == 0 {
            return true;
        }
        let cap = self.capacity();
        // Split the copy at the wrap boundary.
        let first = (cap - self.write_idx).min(n) as usize;
        let w = self.write_idx as usize;
        self.data[w..w + first].copy_from_slice(&src[..first]);
        self.data[..src.len() - first].copy_from_slice(&src[first..]);
        self.write_idx = (self.write_idx + n) % cap;
        self.write_total = self.write_total.wrapping_add(n);
        true
    }

    /// Copy `dst.len()` items from the head of the ring into `dst`.
    ///
    /// With `consume = false` this is a peek: the read cursor is left in
    /// place and the same items can be read again.  Fails (copying
    /// nothing) when fewer items than requested are queued.
    pub fn read(&mut self, dst: &mut [T], consume: bool) -> bool {
        let n = dst.len() as u32;
        if self.len() < n {
            return false;
        }
        if n == 0 {
            return true;
        }
        let cap = self.capacity();
        let first = (cap - self.read_idx).min(n) as usize;
        let r = self.read_idx as usize;
        let dlen = dst.len();
        dst[..first].copy_from_slice(&self.data[r..r + first]);
        dst[first..].copy_from_slice(&self.data[..dlen - first]);
        if consume {
            self.read_idx = (self.read_idx + n) % cap;
            self.read_total = self.read_total.wrapping_add(n);
        }
        true
    }

    /// Drop `n` items from the head without copying them out.
    pub fn consume(&mut self, n: u32) -> bool {
        if self.len() < n {
            return false;
        }
        if n == 0 {
            return true;
        }
        self.read_idx = (self.read_idx + n) % self.capacity();
        self.read_total = self.read_total.wrapping_add(n);
        true
    }

    /// Discard everything and reset the cursors and totals.
    pub fn flush(&mut self) {
        self.read_idx = 0;
        self.write_idx = 0;
        self.read_total = 0;
        self.write_total = 0;
    }

    /// Append a single item; `false` when full.
    #[inline]
    pub fn push(&mut self, value: T) -> bool {
        self.write(core::slice::from_ref(&value))
    }

    /// Remove and return the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        let mut out = [T::default()];
        if self.read(&mut out, true) {
            Some(out[0])
        } else {
            None
        }
    }

    /// Peek at the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        Some(&self.data[self.read_idx as usize])
    }
}
