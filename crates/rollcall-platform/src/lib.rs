//! Platform adapter traits for rollcall
//!
//! This crate defines the interface between the attendance core and the
//! device it runs on: position fixes, the platform permission query and the
//! user-facing consent prompt. It contains no device code itself.

mod fixed;
mod mock;
mod traits;

pub use fixed::*;
pub use mock::*;
pub use traits::*;
