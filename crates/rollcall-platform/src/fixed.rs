//! Static platform for command-line use

use async_trait::async_trait;
use rollcall_api::{Coordinate, PlatformPermission, PositionOptions};
use tracing::debug;

use crate::{Geolocator, PermissionQuery, PlatformError, PlatformResult};

/// Platform whose position is supplied up front, e.g. from command-line flags
#[derive(Debug, Clone)]
pub struct StaticPlatform {
    position: Option<Coordinate>,
    permission: PlatformPermission,
}

impl StaticPlatform {
    pub fn new(position: Option<Coordinate>) -> Self {
        Self {
            position,
            permission: PlatformPermission::Prompt,
        }
    }

    /// Report `permission` from the permission query
    pub fn with_permission(mut self, permission: PlatformPermission) -> Self {
        self.permission = permission;
        self
    }
}

#[async_trait]
impl Geolocator for StaticPlatform {
    async fn current_position(&self, options: PositionOptions) -> PlatformResult<Coordinate> {
        debug!(high_accuracy = options.high_accuracy, "Static position requested");

        if self.permission == PlatformPermission::Denied {
            return Err(PlatformError::PermissionDenied);
        }
        self.position.ok_or(PlatformError::PositionUnavailable)
    }
}

impl PermissionQuery for StaticPlatform {
    fn query(&self) -> PlatformPermission {
        self.permission
    }
}
