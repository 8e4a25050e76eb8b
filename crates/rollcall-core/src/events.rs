//! Core events emitted by the engine

use chrono::{DateTime, Local};
use rollcall_api::{CheckInRecord, PromptContext, RevokeReason, SessionEndReason};
use rollcall_util::{SectionId, SessionId};

/// Events emitted by the attendance engine
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Location permission granted; activity window opened
    PermissionGranted {
        context: PromptContext,
        granted_at: DateTime<Local>,
        expires_at: DateTime<Local>,
    },

    /// Activity window replaced by the user
    PermissionExtended { expires_at: DateTime<Local> },

    /// Grant left the Granted state
    PermissionRevoked { reason: RevokeReason },

    /// Permission moved to Denied
    PermissionDenied,

    /// Platform no longer reports a denial; requests are possible again
    PermissionRestored,

    /// Auto-check-in preference changed
    AutoCheckInChanged { enabled: bool },

    /// A student was admitted to a session
    CheckedIn { record: CheckInRecord },

    SessionStarted {
        session_id: SessionId,
        section_id: SectionId,
        /// Set when the session ends on its own
        auto_end_at: Option<DateTime<Local>>,
    },

    SessionEnded {
        session_id: SessionId,
        section_id: SectionId,
        reason: SessionEndReason,
    },
}
