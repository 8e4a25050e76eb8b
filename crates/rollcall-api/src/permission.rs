//! Location permission types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Location-access grant status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    NotGranted,
    Granted,
    Denied,
}

/// Persisted location permission, including the activity window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionState {
    pub status: PermissionStatus,
    pub granted_at: Option<DateTime<Local>>,
    pub expires_at: Option<DateTime<Local>>,
    /// User preference for unattended check-in while the window is open
    pub auto_check_in: bool,
}

impl PermissionState {
    pub fn not_granted(auto_check_in: bool) -> Self {
        Self {
            status: PermissionStatus::NotGranted,
            granted_at: None,
            expires_at: None,
            auto_check_in,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.status == PermissionStatus::Granted
    }

    /// `expires_at` is set exactly when the status is Granted
    pub fn is_consistent(&self) -> bool {
        match self.status {
            PermissionStatus::Granted => self.granted_at.is_some() && self.expires_at.is_some(),
            PermissionStatus::NotGranted | PermissionStatus::Denied => {
                self.granted_at.is_none() && self.expires_at.is_none()
            }
        }
    }

    /// Whether the activity window has run out at `now`
    pub fn is_expired_at(&self, now: DateTime<Local>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

impl Default for PermissionState {
    fn default() -> Self {
        Self::not_granted(false)
    }
}

/// Why a grant left the Granted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeReason {
    /// Activity window elapsed
    Expired,
    /// User turned location access off
    UserRevoked,
}

/// Grant state reported by the platform permission query API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformPermission {
    Granted,
    Denied,
    Prompt,
}

/// Where the permission request came from; only selects the prompt copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptContext {
    General,
    CheckIn,
    Session,
}

impl PromptContext {
    pub fn title(&self) -> &'static str {
        match self {
            PromptContext::General => "Enable location access",
            PromptContext::CheckIn => "Location needed to check in",
            PromptContext::Session => "Location needed for this session",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PromptContext::General => {
                "Your location is used to confirm you are in class. Access stays on for 24 hours."
            }
            PromptContext::CheckIn => {
                "We compare your position with your teacher's check-in point to mark you present."
            }
            PromptContext::Session => {
                "This session requires location. Allow access so your attendance can be recorded."
            }
        }
    }
}
