#![no_std]
extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod endian;
pub mod handle;
pub mod macros;
pub mod num;
pub mod range_set;

#[doc(hidden)]
pub use log;
