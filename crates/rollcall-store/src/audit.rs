//! Audit event types

use chrono::{DateTime, Local};
use rollcall_api::{CheckInStatus, PromptContext, RevokeReason, SessionEndReason};
use rollcall_util::{SectionId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Engine started against this store
    ServiceStarted,

    /// Engine shut down
    ServiceStopped,

    /// Location permission granted, opening an activity window
    PermissionGranted {
        context: PromptContext,
        expires_at: DateTime<Local>,
    },

    /// Activity window renewed by the user
    PermissionExtended { expires_at: DateTime<Local> },

    /// Grant left the Granted state
    PermissionRevoked { reason: RevokeReason },

    /// User declined the prompt or the platform refused access
    PermissionDenied { reason: String },

    /// Auto-check-in preference changed
    AutoCheckInChanged { enabled: bool },

    SectionCreated {
        section_id: SectionId,
        teacher_id: UserId,
        radius_meters: f64,
    },

    SessionStarted {
        session_id: SessionId,
        section_id: SectionId,
        radius_meters: f64,
        require_location: bool,
    },

    SessionEnded {
        session_id: SessionId,
        reason: SessionEndReason,
    },

    /// Student admitted to a session
    CheckInAdmitted {
        session_id: SessionId,
        student_id: UserId,
        distance_meters: f64,
        status: CheckInStatus,
    },

    /// Admission refused
    CheckInRejected {
        session_id: SessionId,
        student_id: UserId,
        distance_meters: Option<f64>,
        reason: String,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: rollcall_util::now(),
            event,
        }
    }
}
