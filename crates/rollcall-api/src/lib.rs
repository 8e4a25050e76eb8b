//! Shared domain types for rollcall
//!
//! This crate defines the vocabulary shared by the store, the platform
//! adapters and the core engine:
//! - Coordinates and the operating-region bounding box
//! - Sections, sessions and check-in records
//! - Location permission state
//! - Attendance error kinds

mod error;
mod permission;
mod types;

pub use error::*;
pub use permission::*;
pub use types::*;

/// Mean Earth radius used for great-circle distances, in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
