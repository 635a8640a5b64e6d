#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ring_buffer;
pub mod time;

#[cfg(test)]
mod ring_buffer_tests;
#[cfg(test)]
mod time_tests;

pub use ring_buffer::Ring;
pub use time::{deadline_passed, elapsed};
