//! Auto-check-in scanner

use chrono::{DateTime, Local};
use rollcall_api::{
    AttendanceResult, AdmissionResult, BoundingBox, CheckInMode, PermissionState, PositionOptions,
};
use rollcall_platform::Geolocator;
use rollcall_store::Store;
use rollcall_util::{SectionId, UserId};
use tracing::{debug, info};

use crate::admission::{commit_admission, evaluate_check_in};

/// Collaborators and settings a scan runs against
pub struct ScanContext<'a> {
    pub permission: &'a PermissionState,
    pub geolocator: &'a dyn Geolocator,
    pub options: PositionOptions,
    pub store: &'a dyn Store,
    pub region: Option<&'a BoundingBox>,
}

/// Sweep the student's sections and check in wherever a session is open.
///
/// Does nothing, and acquires no fix, unless permission is Granted with the
/// auto-check-in preference on. Sections without an Active session and
/// sessions the student already attends are skipped silently. Other
/// rejections are returned alongside the admissions.
pub async fn scan_for_auto_check_in(
    ctx: &ScanContext<'_>,
    sections: &[SectionId],
    student_id: &UserId,
    now: DateTime<Local>,
) -> AttendanceResult<Vec<AdmissionResult>> {
    if !(ctx.permission.is_granted() && ctx.permission.auto_check_in) {
        debug!(status = ?ctx.permission.status, "Auto-check-in scan skipped");
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for section_id in sections {
        match ctx.store.active_session_for_section(section_id)? {
            Some(session) if !session.has_attendee(student_id) => candidates.push(session),
            _ => {}
        }
    }

    if candidates.is_empty() {
        debug!(student_id = %student_id, "No open sessions to scan");
        return Ok(Vec::new());
    }

    let position = ctx.geolocator.current_position(ctx.options).await?;

    let mut results = Vec::new();
    for session in &candidates {
        let evaluated = evaluate_check_in(
            session,
            student_id,
            Some(position),
            CheckInMode::Auto,
            ctx.region,
            now,
        );
        let result = commit_admission(ctx.store, evaluated)?;

        if result.error().is_some_and(|e| e.is_auto_scan_skip()) {
            continue;
        }
        results.push(result);
    }

    info!(
        student_id = %student_id,
        sessions = candidates.len(),
        admitted = results.iter().filter(|r| r.is_admitted()).count(),
        "Auto-check-in scan complete"
    );

    Ok(results)
}
