//! Store trait definitions

use chrono::{DateTime, Local};
use rollcall_api::{CheckInRecord, PermissionState, Section, Session};
use rollcall_util::{SectionId, SessionId, UserId};

use crate::{AuditEvent, StoreResult};

/// Outcome of the atomic "add attendee if absent" write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInCommit {
    /// Attendee added and record appended
    Inserted,
    /// Student was already in the attendee set; nothing written
    AlreadyPresent,
    /// Session missing or no longer Active; nothing written
    SessionNotActive,
}

/// Main store trait
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Sections

    /// Insert or replace a section
    fn put_section(&self, section: &Section) -> StoreResult<()>;

    fn get_section(&self, section_id: &SectionId) -> StoreResult<Option<Section>>;

    /// Enroll a student. Returns false if already enrolled.
    fn join_section(&self, section_id: &SectionId, user_id: &UserId) -> StoreResult<bool>;

    /// Sections a student has joined
    fn joined_sections(&self, user_id: &UserId) -> StoreResult<Vec<SectionId>>;

    // Sessions

    /// Insert a session unless its section already has an Active one.
    /// Returns false when another Active session exists.
    fn insert_session(&self, session: &Session) -> StoreResult<bool>;

    fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<Session>>;

    fn active_session_for_section(&self, section_id: &SectionId) -> StoreResult<Option<Session>>;

    /// All sessions still marked Active
    fn active_sessions(&self) -> StoreResult<Vec<Session>>;

    /// Mark a session Ended. Returns false if it was not Active.
    fn end_session(&self, session_id: &SessionId, ended_at: DateTime<Local>) -> StoreResult<bool>;

    // Check-ins

    /// Add the student to the attendee set and append the record, as one
    /// conditional write. Never records the same student twice.
    fn record_check_in(&self, record: &CheckInRecord) -> StoreResult<CheckInCommit>;

    fn check_ins_for_session(&self, session_id: &SessionId) -> StoreResult<Vec<CheckInRecord>>;

    // Permission

    fn load_permission(&self) -> StoreResult<Option<PermissionState>>;

    fn save_permission(&self, state: &PermissionState) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
