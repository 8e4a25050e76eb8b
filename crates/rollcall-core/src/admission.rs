//! Session admission logic

use chrono::{DateTime, Local};
use rollcall_api::{
    AdmissionDecision, AdmissionResult, AttendanceError, AttendanceResult, BoundingBox,
    CheckInMode, CheckInRecord, Coordinate, Session,
};
use rollcall_store::{AuditEvent, AuditEventType, CheckInCommit, Store};
use rollcall_util::UserId;
use tracing::{debug, info};

use crate::geo::distance_meters;

/// Decide whether `student_id` may check in to `session`.
///
/// Pure: the attendee set is not touched. A positive decision must still be
/// committed with [`commit_admission`], which performs the atomic
/// "add attendee if absent" write.
pub fn evaluate_check_in(
    session: &Session,
    student_id: &UserId,
    candidate: Option<Coordinate>,
    mode: CheckInMode,
    region: Option<&BoundingBox>,
    now: DateTime<Local>,
) -> AdmissionResult {
    let reject = |error: AttendanceError, distance_meters: Option<f64>| AdmissionResult {
        session_id: session.id.clone(),
        section_id: session.section_id.clone(),
        student_id: student_id.clone(),
        distance_meters,
        decision: AdmissionDecision::Rejected(error),
    };

    if !session.is_active() {
        return reject(AttendanceError::NoActiveSession, None);
    }

    if session.has_attendee(student_id) {
        return reject(AttendanceError::AlreadyCheckedIn, None);
    }

    // Auto mode always verifies location
    let require_location = session.require_location || mode == CheckInMode::Auto;

    let (location, distance) = if require_location {
        let Some(candidate) = candidate else {
            return reject(AttendanceError::LocationRequired, None);
        };

        if !candidate.is_valid() {
            return reject(
                AttendanceError::InvalidCoordinate {
                    latitude: candidate.latitude,
                    longitude: candidate.longitude,
                },
                None,
            );
        }

        let distance = distance_meters(&session.location, &candidate);

        if region.is_some_and(|region| !region.contains(&candidate)) {
            return reject(AttendanceError::OutOfRegion, Some(distance));
        }

        // NaN fails closed
        if distance.is_nan() || distance > session.radius_meters {
            return reject(
                AttendanceError::OutOfRange {
                    distance,
                    max: session.radius_meters,
                },
                Some(distance),
            );
        }

        (Some(candidate), distance)
    } else {
        (None, 0.0)
    };

    let record = CheckInRecord {
        session_id: session.id.clone(),
        section_id: session.section_id.clone(),
        student_id: student_id.clone(),
        timestamp: now,
        location,
        distance_meters: distance,
        status: mode.status(),
    };

    AdmissionResult {
        session_id: session.id.clone(),
        section_id: session.section_id.clone(),
        student_id: student_id.clone(),
        distance_meters: Some(distance),
        decision: AdmissionDecision::Admitted(record),
    }
}

/// Write an admission through the store and audit the outcome.
///
/// An Admitted result whose conditional write loses a race comes back
/// Rejected (`AlreadyCheckedIn` or `NoActiveSession`).
pub fn commit_admission(
    store: &dyn Store,
    mut result: AdmissionResult,
) -> AttendanceResult<AdmissionResult> {
    if let AdmissionDecision::Admitted(record) = &result.decision {
        let lost = match store.record_check_in(record)? {
            CheckInCommit::Inserted => None,
            CheckInCommit::AlreadyPresent => Some(AttendanceError::AlreadyCheckedIn),
            CheckInCommit::SessionNotActive => Some(AttendanceError::NoActiveSession),
        };

        if let Some(error) = lost {
            debug!(
                session_id = %result.session_id,
                student_id = %result.student_id,
                error = %error,
                "Admission lost the conditional write"
            );
            result.decision = AdmissionDecision::Rejected(error);
        }
    }

    match &result.decision {
        AdmissionDecision::Admitted(record) => {
            info!(
                session_id = %record.session_id,
                student_id = %record.student_id,
                distance_meters = record.distance_meters,
                status = record.status.as_str(),
                "Check-in admitted"
            );

            let _ = store.append_audit(AuditEvent::new(AuditEventType::CheckInAdmitted {
                session_id: record.session_id.clone(),
                student_id: record.student_id.clone(),
                distance_meters: record.distance_meters,
                status: record.status,
            }));
        }
        AdmissionDecision::Rejected(error) => {
            info!(
                session_id = %result.session_id,
                student_id = %result.student_id,
                distance_meters = ?result.distance_meters,
                reason = %error,
                "Check-in rejected"
            );

            let _ = store.append_audit(AuditEvent::new(AuditEventType::CheckInRejected {
                session_id: result.session_id.clone(),
                student_id: result.student_id.clone(),
                distance_meters: result.distance_meters,
                reason: error.to_string(),
            }));
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_api::{CheckInStatus, SessionStatus};
    use rollcall_store::SqliteStore;
    use rollcall_util::{SectionId, SessionId};
    use std::collections::BTreeSet;

    fn manila() -> Coordinate {
        Coordinate::new(14.5995, 120.9842).unwrap()
    }

    fn philippines() -> BoundingBox {
        BoundingBox {
            min_latitude: 4.5,
            max_latitude: 21.5,
            min_longitude: 116.0,
            max_longitude: 127.0,
        }
    }

    fn make_session(require_location: bool) -> Session {
        Session {
            id: SessionId::new(),
            section_id: SectionId::new("math-7"),
            location: manila(),
            radius_meters: 10.0,
            status: SessionStatus::Active,
            attendee_ids: BTreeSet::new(),
            require_location,
            started_at: rollcall_util::now(),
            duration_minutes: 60,
            auto_end: false,
            ended_at: None,
        }
    }

    fn student() -> UserId {
        UserId::new("student-1")
    }

    fn evaluate(session: &Session, candidate: Option<Coordinate>) -> AdmissionResult {
        evaluate_check_in(
            session,
            &student(),
            candidate,
            CheckInMode::Manual,
            Some(&philippines()),
            rollcall_util::now(),
        )
    }

    #[test]
    fn same_point_is_admitted() {
        let session = make_session(true);
        let result = evaluate(&session, Some(manila()));

        assert!(result.is_admitted());
        let record = result.record().unwrap();
        assert!(record.distance_meters < 0.01);
        assert_eq!(record.status, CheckInStatus::Present);
        assert_eq!(record.location, Some(manila()));
    }

    #[test]
    fn fifty_meters_away_is_out_of_range() {
        let session = make_session(true);
        let student_point = Coordinate::new(14.59995, 120.9842).unwrap();
        let result = evaluate(&session, Some(student_point));

        match result.error() {
            Some(AttendanceError::OutOfRange { distance, max }) => {
                assert!((distance - 50.0).abs() < 1.0);
                assert_eq!(*max, 10.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        // Distance is reported on rejection too
        assert!(result.distance_meters.is_some());
    }

    #[test]
    fn attendee_is_rejected_before_location_checks() {
        let mut session = make_session(true);
        session.admit(student());

        let result = evaluate(&session, None);
        assert_eq!(result.error(), Some(&AttendanceError::AlreadyCheckedIn));
        assert_eq!(result.distance_meters, None);
    }

    #[test]
    fn missing_location_is_required() {
        let session = make_session(true);
        let result = evaluate(&session, None);
        assert_eq!(result.error(), Some(&AttendanceError::LocationRequired));
    }

    #[test]
    fn location_outside_region_is_refused() {
        let mut session = make_session(true);
        let tokyo = Coordinate::new(35.6762, 139.6503).unwrap();
        session.location = tokyo;

        let result = evaluate(&session, Some(tokyo));
        assert_eq!(result.error(), Some(&AttendanceError::OutOfRegion));

        // Without a configured region the same point is fine
        let result = evaluate_check_in(
            &session,
            &student(),
            Some(tokyo),
            CheckInMode::Manual,
            None,
            rollcall_util::now(),
        );
        assert!(result.is_admitted());
    }

    #[test]
    fn malformed_coordinate_fails_closed() {
        let session = make_session(true);
        let bogus = Coordinate {
            latitude: f64::NAN,
            longitude: 120.9842,
        };

        let result = evaluate(&session, Some(bogus));
        assert!(matches!(
            result.error(),
            Some(AttendanceError::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn no_location_session_records_zero_distance() {
        let session = make_session(false);
        let result = evaluate(&session, None);

        let record = result.record().unwrap();
        assert_eq!(record.distance_meters, 0.0);
        assert_eq!(record.location, None);

        // A supplied position is ignored
        let result = evaluate(&session, Some(manila()));
        assert_eq!(result.record().unwrap().location, None);
    }

    #[test]
    fn auto_mode_forces_location() {
        let session = make_session(false);
        let result = evaluate_check_in(
            &session,
            &student(),
            None,
            CheckInMode::Auto,
            None,
            rollcall_util::now(),
        );
        assert_eq!(result.error(), Some(&AttendanceError::LocationRequired));

        let result = evaluate_check_in(
            &session,
            &student(),
            Some(manila()),
            CheckInMode::Auto,
            None,
            rollcall_util::now(),
        );
        assert_eq!(
            result.record().unwrap().status,
            CheckInStatus::PresentAuto
        );
    }

    #[test]
    fn ended_session_has_no_admission() {
        let mut session = make_session(true);
        session.mark_ended(rollcall_util::now());

        let result = evaluate(&session, Some(manila()));
        assert_eq!(result.error(), Some(&AttendanceError::NoActiveSession));
    }

    #[test]
    fn second_commit_loses_the_race() {
        let store = SqliteStore::in_memory().unwrap();
        let session = make_session(true);
        store.insert_session(&session).unwrap();

        // Both evaluations see an empty attendee set
        let first = evaluate(&session, Some(manila()));
        let second = evaluate(&session, Some(manila()));
        assert!(first.is_admitted() && second.is_admitted());

        let first = commit_admission(&store, first).unwrap();
        let second = commit_admission(&store, second).unwrap();

        assert!(first.is_admitted());
        assert_eq!(second.error(), Some(&AttendanceError::AlreadyCheckedIn));
        assert_eq!(store.check_ins_for_session(&session.id).unwrap().len(), 1);
    }
}
