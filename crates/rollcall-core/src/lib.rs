//! Attendance core for rollcall
//!
//! This crate is the heart of rollcall, containing:
//! - Great-circle distance (Haversine)
//! - Location permission state machine (NotGranted -> Granted -> NotGranted, any -> Denied)
//! - Session admission with an atomic "add attendee if absent" commit
//! - Auto-check-in scanner over a student's joined sections
//! - Cancellable timers for permission expiry and session auto-end

mod admission;
mod engine;
mod events;
mod geo;
mod permission;
mod scanner;
mod scheduler;
mod sessions;

pub use admission::*;
pub use engine::*;
pub use events::*;
pub use geo::*;
pub use permission::*;
pub use scanner::*;
pub use scheduler::*;
pub use sessions::*;
