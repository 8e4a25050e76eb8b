//! Platform adapter traits

use async_trait::async_trait;
use rollcall_api::{AttendanceError, Coordinate, PlatformPermission, PositionOptions, PromptContext};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from platform operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Position request timed out")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

impl From<PlatformError> for AttendanceError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::PermissionDenied => AttendanceError::PermissionDenied,
            PlatformError::PositionUnavailable => AttendanceError::PositionUnavailable,
            PlatformError::Timeout => AttendanceError::Timeout,
            // No dedicated kind; an adapter fault means no usable fix
            PlatformError::Internal(_) => AttendanceError::PositionUnavailable,
        }
    }
}

/// Source of position fixes
#[async_trait]
pub trait Geolocator: Send + Sync {
    /// Acquire one position fix honoring `options`
    async fn current_position(&self, options: PositionOptions) -> PlatformResult<Coordinate>;
}

/// Platform permission query API
pub trait PermissionQuery: Send + Sync {
    /// Current grant state as the platform reports it
    fn query(&self) -> PlatformPermission;

    /// Subscribe to grant state changes.
    /// Returns None when the platform has no change notifications.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<PlatformPermission>> {
        None
    }
}

/// Contextual consent prompt shown before the platform prompt
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Ask the user; true when they accept
    async fn ask(&self, context: PromptContext) -> bool;
}
