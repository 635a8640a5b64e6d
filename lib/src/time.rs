//! Wrap-aware arithmetic over a free-running `u32` millisecond counter.
//!
//! The counter wraps roughly every 49.7 days; both helpers stay correct
//! across the wrap as long as the spans involved are shorter than 2^31 ms.

/// Milliseconds elapsed between two counter readings.
///
/// Modular unsigned subtraction: correct even when the counter wrapped
/// between `old` and `now`.
#[inline]
pub fn elapsed(old: u32, now: u32) -> u32 {
    now.wrapping_sub(old)
}

/// Whether `deadline` has been reached at time `now`.
///
/// A deadline is considered passed when the wrapped distance from it is
/// less than 2^31 ms, i.e. `now` sits in the half-circle after `deadline`.
#[inline]
pub fn deadline_passed(now: u32, deadline: u32) -> bool {
    now.wrapping_sub(deadline) < 0x8000_0000
}
