//! Error kinds surfaced by rollcall operations

use thiserror::Error;

/// Errors from permission, session and check-in operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttendanceError {
    #[error("Location access was previously denied; change it in your device settings")]
    PermissionPreviouslyDenied,

    #[error("Location permission denied by the platform")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Timed out waiting for a position fix")]
    Timeout,

    #[error("Location permission is not granted")]
    PermissionNotGranted,

    #[error("Already checked in to this session")]
    AlreadyCheckedIn,

    #[error("This session requires your location")]
    LocationRequired,

    #[error("Location is outside the operating region")]
    OutOfRegion,

    #[error("Too far from the check-in point: {distance:.1}m away, maximum {max:.1}m")]
    OutOfRange { distance: f64, max: f64 },

    #[error("No active session")]
    NoActiveSession,

    #[error("Section already has an active session")]
    SessionAlreadyActive,

    #[error("Section not found: {0}")]
    SectionNotFound(String),

    #[error("Invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Check-in radius {radius}m must be between {min}m and {max}m")]
    InvalidRadius { radius: f64, min: f64, max: f64 },

    #[error("Store error: {0}")]
    Store(String),
}

impl AttendanceError {
    /// Conditions the auto-check-in scan skips without reporting
    pub fn is_auto_scan_skip(&self) -> bool {
        matches!(
            self,
            AttendanceError::AlreadyCheckedIn | AttendanceError::NoActiveSession
        )
    }
}

pub type AttendanceResult<T> = Result<T, AttendanceError>;
