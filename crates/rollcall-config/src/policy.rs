//! Validated policy structures

use crate::schema::{RawConfig, RawRegion};
use rollcall_api::{AttendanceError, BoundingBox, PositionOptions};
use std::path::PathBuf;
use std::time::Duration;

/// Default activity window: 24 hours
pub const DEFAULT_EXPIRATION_TIME_MS: u64 = 24 * 60 * 60 * 1000;

/// Longest accepted activity window: one year
pub const MAX_EXPIRATION_TIME_MS: u64 = 365 * DEFAULT_EXPIRATION_TIME_MS;

/// Default platform fix timeout
pub const DEFAULT_GEOLOCATION_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_MIN_RADIUS_METERS: f64 = 5.0;
pub const DEFAULT_MAX_RADIUS_METERS: f64 = 150.0;
pub const DEFAULT_RADIUS_METERS: f64 = 10.0;

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone)]
pub struct Policy {
    pub service: ServiceConfig,
    pub permission: PermissionPolicy,
    pub geolocation: PositionOptions,
    pub check_in: RadiusPolicy,
    /// Operating region; None disables the region check
    pub region: Option<BoundingBox>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let geolocation = PositionOptions {
            high_accuracy: raw.geolocation.high_accuracy.unwrap_or(true),
            timeout: Duration::from_millis(
                raw.geolocation
                    .timeout_ms
                    .unwrap_or(DEFAULT_GEOLOCATION_TIMEOUT_MS),
            ),
            // Fixes always come fresh from the platform
            maximum_age: Duration::ZERO,
        };

        Self {
            service: ServiceConfig {
                data_dir: raw
                    .service
                    .data_dir
                    .unwrap_or_else(rollcall_util::default_data_dir),
            },
            permission: PermissionPolicy {
                expiration_time_ms: raw
                    .permission
                    .expiration_time_ms
                    .unwrap_or(DEFAULT_EXPIRATION_TIME_MS),
            },
            geolocation,
            check_in: RadiusPolicy {
                min_meters: raw
                    .check_in
                    .min_radius_meters
                    .unwrap_or(DEFAULT_MIN_RADIUS_METERS),
                max_meters: raw
                    .check_in
                    .max_radius_meters
                    .unwrap_or(DEFAULT_MAX_RADIUS_METERS),
                default_meters: raw
                    .check_in
                    .default_radius_meters
                    .unwrap_or(DEFAULT_RADIUS_METERS),
            },
            region: raw.region.map(convert_region),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            permission: PermissionPolicy::default(),
            geolocation: PositionOptions::default(),
            check_in: RadiusPolicy::default(),
            region: None,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: rollcall_util::default_data_dir(),
        }
    }
}

/// Location permission window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub expiration_time_ms: u64,
}

impl PermissionPolicy {
    /// Length of the activity window, capped at one year
    pub fn window(&self) -> chrono::Duration {
        rollcall_util::millis(self.expiration_time_ms.min(MAX_EXPIRATION_TIME_MS))
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            expiration_time_ms: DEFAULT_EXPIRATION_TIME_MS,
        }
    }
}

/// Allowed check-in radius range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusPolicy {
    pub min_meters: f64,
    pub max_meters: f64,
    pub default_meters: f64,
}

impl RadiusPolicy {
    /// Reject radii outside `min_meters..=max_meters`
    pub fn check(&self, radius: f64) -> Result<f64, AttendanceError> {
        if radius.is_finite() && radius >= self.min_meters && radius <= self.max_meters {
            Ok(radius)
        } else {
            Err(AttendanceError::InvalidRadius {
                radius,
                min: self.min_meters,
                max: self.max_meters,
            })
        }
    }
}

impl Default for RadiusPolicy {
    fn default() -> Self {
        Self {
            min_meters: DEFAULT_MIN_RADIUS_METERS,
            max_meters: DEFAULT_MAX_RADIUS_METERS,
            default_meters: DEFAULT_RADIUS_METERS,
        }
    }
}

fn convert_region(raw: RawRegion) -> BoundingBox {
    BoundingBox {
        min_latitude: raw.min_latitude,
        max_latitude: raw.max_latitude,
        min_longitude: raw.min_longitude,
        max_longitude: raw.max_longitude,
    }
}
