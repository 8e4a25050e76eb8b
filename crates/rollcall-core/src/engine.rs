//! Attendance engine
//!
//! Owns the permission state machine and the active-session timers, and
//! routes every admission through the store's conditional write. Callers
//! drive it from one task: operations take `&mut self` and timer fires are
//! fed back through [`AttendanceEngine::handle_timer`].

use chrono::{DateTime, Local};
use rollcall_api::{
    AdmissionResult, AttendanceError, AttendanceResult, CheckInMode, CheckInRecord, Coordinate,
    PermissionState, PlatformPermission, PromptContext, RevokeReason, Section, Session,
    SessionEndReason, SessionStatus,
};
use rollcall_config::Policy;
use rollcall_platform::{ConsentPrompt, Geolocator};
use rollcall_store::{AuditEvent, AuditEventType, Store};
use rollcall_util::{SectionId, SessionId, UserId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::admission::{commit_admission, evaluate_check_in};
use crate::scanner::{scan_for_auto_check_in, ScanContext};
use crate::{
    CoreEvent, PermissionTracker, PlatformSync, RequestGate, Scheduler, SessionBook, StartSession,
    TimerFired, TimerKey,
};

/// Details for a new section
#[derive(Debug, Clone, PartialEq)]
pub struct NewSection {
    pub id: SectionId,
    pub name: String,
    pub subject: String,
    pub teacher_id: UserId,
    pub check_in_location: Coordinate,
    /// Defaults to the configured default radius
    pub radius_meters: Option<f64>,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub permission: PermissionState,
    pub store_ok: bool,
    /// Tracked sessions, soonest scheduled end first
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub section_id: SectionId,
    pub scheduled_end: DateTime<Local>,
    /// Whether the session ends on its own at `scheduled_end`
    pub auto_end: bool,
}

/// The attendance engine
pub struct AttendanceEngine {
    policy: Policy,
    store: Arc<dyn Store>,
    geolocator: Arc<dyn Geolocator>,
    prompt: Arc<dyn ConsentPrompt>,
    scheduler: Scheduler,
    timer_rx: Option<mpsc::UnboundedReceiver<TimerFired>>,
    permission: PermissionTracker,
    sessions: SessionBook,
}

impl AttendanceEngine {
    /// Create an engine over the persisted permission state.
    ///
    /// Timers are not armed until [`resume`](Self::resume) runs.
    pub fn new(
        policy: Policy,
        store: Arc<dyn Store>,
        geolocator: Arc<dyn Geolocator>,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> AttendanceResult<Self> {
        let state = store.load_permission()?.unwrap_or_default();
        let permission = PermissionTracker::new(state, policy.permission.window());
        let (scheduler, timer_rx) = Scheduler::new();

        info!(
            permission = ?permission.status(),
            expiration_time_ms = policy.permission.expiration_time_ms,
            region = policy.region.is_some(),
            "Attendance engine initialized"
        );

        let _ = store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted));

        Ok(Self {
            policy,
            store,
            geolocator,
            prompt,
            scheduler,
            timer_rx: Some(timer_rx),
            permission,
            sessions: SessionBook::new(),
        })
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn permission(&self) -> &PermissionState {
        self.permission.state()
    }

    /// Sessions this engine holds timers for
    pub fn tracked_sessions(&self) -> &SessionBook {
        &self.sessions
    }

    pub fn status(&self) -> EngineStatus {
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|(id, tracked)| SessionSummary {
                session_id: id.clone(),
                section_id: tracked.section_id.clone(),
                scheduled_end: tracked.scheduled_end,
                auto_end: tracked.has_auto_end(),
            })
            .collect();
        sessions.sort_by_key(|s| s.scheduled_end);

        EngineStatus {
            permission: self.permission.state().clone(),
            store_ok: self.store.is_healthy(),
            sessions,
        }
    }

    /// Receiver for timer fires. Can only be taken once.
    pub fn take_timer_events(&mut self) -> Option<mpsc::UnboundedReceiver<TimerFired>> {
        self.timer_rx.take()
    }

    /// Reload persisted state and re-arm timers, then run the auto-check-in
    /// scan for `student` when the preference is on.
    pub async fn resume(
        &mut self,
        student: Option<&UserId>,
        now: DateTime<Local>,
    ) -> AttendanceResult<Vec<CoreEvent>> {
        let mut events = Vec::new();

        let state = self.store.load_permission()?.unwrap_or_default();
        self.permission = PermissionTracker::new(state, self.policy.permission.window());

        match self.expire_if_due(now)? {
            Some(event) => events.push(event),
            None => self.arm_permission_expiry(now),
        }

        self.sessions.clear();
        for session in self.store.active_sessions()? {
            if !session.auto_end {
                self.sessions.track(&session, None);
                continue;
            }

            let end = session.scheduled_end();
            if end <= now {
                if let Some(event) =
                    self.finish_session(&session.id, SessionEndReason::DurationElapsed, now)?
                {
                    events.push(event);
                }
                continue;
            }

            let task = self.scheduler.schedule(
                TimerKey::SessionAutoEnd(session.id.clone()),
                rollcall_util::saturating_until(end, now),
            );
            self.sessions.track(&session, Some(task));
        }

        debug!(
            permission = ?self.permission.status(),
            tracked_sessions = self.sessions.len(),
            "Engine state resumed"
        );

        if let Some(student) = student {
            if self.permission.auto_scan_enabled() {
                match self.scan_for_auto_check_in(student, now).await {
                    Ok(results) => events.extend(
                        results
                            .into_iter()
                            .filter_map(|r| r.into_result().ok())
                            .map(|record| CoreEvent::CheckedIn { record }),
                    ),
                    Err(e) => {
                        warn!(error = %e, "Auto-check-in scan on resume failed");
                        if e == AttendanceError::PermissionDenied {
                            events.push(CoreEvent::PermissionDenied);
                        }
                    }
                }
            }
        }

        Ok(events)
    }

    /// Stop all timers and record the shutdown
    pub fn shutdown(&mut self) {
        self.permission.disarm();
        self.sessions.clear();
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped));
        info!("Attendance engine stopped");
    }

    // Permission

    /// Ask for location access.
    ///
    /// Returns `Ok(None)` when permission is already Granted. Otherwise shows
    /// the consent prompt and acquires one fix; a declined prompt or a
    /// platform failure moves the state to Denied.
    pub async fn request_permission(
        &mut self,
        context: PromptContext,
    ) -> AttendanceResult<Option<CoreEvent>> {
        self.expire_if_due(rollcall_util::now())?;

        match self.permission.check_request() {
            Ok(RequestGate::AlreadyGranted) => {
                debug!("Permission already granted");
                return Ok(None);
            }
            Ok(RequestGate::NeedsConsent) => {}
            Err(e) => {
                warn!(context = ?context, "Permission previously denied");
                return Err(e);
            }
        }

        if !self.prompt.ask(context).await {
            self.mark_denied("consent declined")?;
            return Err(AttendanceError::PermissionDenied);
        }

        if let Err(e) = self.geolocator.current_position(self.policy.geolocation).await {
            let error = AttendanceError::from(e);
            self.mark_denied(&error.to_string())?;
            return Err(error);
        }

        let now = rollcall_util::now();
        let expires_at = self.permission.grant(now);
        self.arm_permission_expiry(now);
        self.save_permission()?;

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::PermissionGranted {
                context,
                expires_at,
            }));

        info!(
            context = ?context,
            expires_at = %expires_at,
            "Location permission granted"
        );

        Ok(Some(CoreEvent::PermissionGranted {
            context,
            granted_at: now,
            expires_at,
        }))
    }

    /// Replace the activity window with a fresh one starting at `now`
    pub fn extend(&mut self, now: DateTime<Local>) -> AttendanceResult<CoreEvent> {
        self.expire_if_due(now)?;

        let expires_at = self.permission.extend(now)?;
        self.arm_permission_expiry(now);
        self.save_permission()?;

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::PermissionExtended {
                expires_at,
            }));

        info!(expires_at = %expires_at, "Location permission extended");

        Ok(CoreEvent::PermissionExtended { expires_at })
    }

    /// Turn location access off. Returns None if it was not Granted.
    pub fn revoke(&mut self) -> AttendanceResult<Option<CoreEvent>> {
        self.apply_revoke(RevokeReason::UserRevoked)
    }

    /// Apply the platform's reported permission
    pub fn sync_platform_permission(
        &mut self,
        permission: PlatformPermission,
    ) -> AttendanceResult<Option<CoreEvent>> {
        match self.permission.sync_platform(permission) {
            PlatformSync::Unchanged => Ok(None),
            PlatformSync::Denied => {
                self.save_permission()?;
                let _ = self
                    .store
                    .append_audit(AuditEvent::new(AuditEventType::PermissionDenied {
                        reason: "platform reported denied".into(),
                    }));
                warn!("Platform reports location permission denied");
                Ok(Some(CoreEvent::PermissionDenied))
            }
            PlatformSync::Restored => {
                self.save_permission()?;
                info!(platform = ?permission, "Location permission may be requested again");
                Ok(Some(CoreEvent::PermissionRestored))
            }
        }
    }

    /// Set the auto-check-in preference.
    ///
    /// Turning it on while Granted runs the scan for `student` right away.
    pub async fn set_auto_check_in(
        &mut self,
        student: &UserId,
        enabled: bool,
        now: DateTime<Local>,
    ) -> AttendanceResult<Vec<AdmissionResult>> {
        if self.permission.set_auto_check_in(enabled) {
            self.save_permission()?;
            let _ = self
                .store
                .append_audit(AuditEvent::new(AuditEventType::AutoCheckInChanged { enabled }));
            info!(enabled, "Auto-check-in preference changed");
        }

        if enabled && self.permission.is_granted() {
            return self.scan_for_auto_check_in(student, now).await;
        }
        Ok(Vec::new())
    }

    // Sections

    pub fn create_section(&self, new: NewSection) -> AttendanceResult<Section> {
        let location = new.check_in_location;
        if !location.is_valid() {
            return Err(AttendanceError::InvalidCoordinate {
                latitude: location.latitude,
                longitude: location.longitude,
            });
        }

        let radius = self
            .policy
            .check_in
            .check(new.radius_meters.unwrap_or(self.policy.check_in.default_meters))?;

        let section = Section {
            id: new.id,
            name: new.name,
            subject: new.subject,
            teacher_id: new.teacher_id,
            check_in_location: location,
            check_in_radius_meters: radius,
        };
        self.store.put_section(&section)?;

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::SectionCreated {
                section_id: section.id.clone(),
                teacher_id: section.teacher_id.clone(),
                radius_meters: radius,
            }));

        info!(section_id = %section.id, radius_meters = radius, "Section created");
        Ok(section)
    }

    /// Enroll a student. Returns false if already enrolled.
    pub fn join_section(&self, section_id: &SectionId, student: &UserId) -> AttendanceResult<bool> {
        if self.store.get_section(section_id)?.is_none() {
            return Err(AttendanceError::SectionNotFound(section_id.to_string()));
        }
        Ok(self.store.join_section(section_id, student)?)
    }

    // Sessions

    /// Open a session for `section_id`. Fails if one is already Active.
    pub fn start_session(
        &mut self,
        section_id: &SectionId,
        options: StartSession,
        now: DateTime<Local>,
    ) -> AttendanceResult<CoreEvent> {
        let section = self
            .store
            .get_section(section_id)?
            .ok_or_else(|| AttendanceError::SectionNotFound(section_id.to_string()))?;

        let location = options.location.unwrap_or(section.check_in_location);
        if !location.is_valid() {
            return Err(AttendanceError::InvalidCoordinate {
                latitude: location.latitude,
                longitude: location.longitude,
            });
        }
        let radius = self
            .policy
            .check_in
            .check(options.radius_meters.unwrap_or(section.check_in_radius_meters))?;

        let session = Session {
            id: SessionId::new(),
            section_id: section.id.clone(),
            location,
            radius_meters: radius,
            status: SessionStatus::Active,
            attendee_ids: BTreeSet::new(),
            require_location: options.require_location,
            started_at: now,
            duration_minutes: options.duration_minutes,
            auto_end: options.auto_end,
            ended_at: None,
        };

        if !self.store.insert_session(&session)? {
            warn!(section_id = %section_id, "Section already has an active session");
            return Err(AttendanceError::SessionAlreadyActive);
        }

        let auto_end_at = session.auto_end.then(|| session.scheduled_end());
        let timer = auto_end_at.map(|end| {
            self.scheduler.schedule(
                TimerKey::SessionAutoEnd(session.id.clone()),
                rollcall_util::saturating_until(end, now),
            )
        });
        self.sessions.track(&session, timer);

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::SessionStarted {
                session_id: session.id.clone(),
                section_id: session.section_id.clone(),
                radius_meters: radius,
                require_location: session.require_location,
            }));

        info!(
            session_id = %session.id,
            section_id = %session.section_id,
            radius_meters = radius,
            require_location = session.require_location,
            auto_end_at = ?auto_end_at,
            "Session started"
        );

        Ok(CoreEvent::SessionStarted {
            session_id: session.id,
            section_id: session.section_id,
            auto_end_at,
        })
    }

    /// End a session by teacher action; cancels its auto-end timer
    pub fn end_session(
        &mut self,
        session_id: &SessionId,
        now: DateTime<Local>,
    ) -> AttendanceResult<CoreEvent> {
        self.finish_session(session_id, SessionEndReason::Manual, now)?
            .ok_or(AttendanceError::NoActiveSession)
    }

    pub fn active_session(&self, section_id: &SectionId) -> AttendanceResult<Option<Session>> {
        Ok(self.store.active_session_for_section(section_id)?)
    }

    pub fn session(&self, session_id: &SessionId) -> AttendanceResult<Option<Session>> {
        Ok(self.store.get_session(session_id)?)
    }

    pub fn check_ins(&self, session_id: &SessionId) -> AttendanceResult<Vec<CheckInRecord>> {
        Ok(self.store.check_ins_for_session(session_id)?)
    }

    // Check-in

    /// Manual check-in to the Active session of `section_id`.
    ///
    /// Platform and store failures are errors; an admission refusal is an
    /// `Ok` result carrying the rejection.
    pub async fn check_in(
        &mut self,
        section_id: &SectionId,
        student: &UserId,
        now: DateTime<Local>,
    ) -> AttendanceResult<AdmissionResult> {
        self.expire_if_due(now)?;

        let session = self
            .store
            .active_session_for_section(section_id)?
            .ok_or(AttendanceError::NoActiveSession)?;

        // A fix is only taken when it can change the outcome
        let needs_fix = session.require_location
            && !session.has_attendee(student)
            && self.permission.is_granted();
        let candidate = if needs_fix {
            Some(self.acquire_fix().await?)
        } else {
            None
        };

        let evaluated = evaluate_check_in(
            &session,
            student,
            candidate,
            CheckInMode::Manual,
            self.policy.region.as_ref(),
            now,
        );
        commit_admission(self.store.as_ref(), evaluated)
    }

    /// Sweep the student's joined sections for open sessions
    pub async fn scan_for_auto_check_in(
        &mut self,
        student: &UserId,
        now: DateTime<Local>,
    ) -> AttendanceResult<Vec<AdmissionResult>> {
        self.expire_if_due(now)?;

        let sections = self.store.joined_sections(student)?;
        let outcome = {
            let ctx = ScanContext {
                permission: self.permission.state(),
                geolocator: self.geolocator.as_ref(),
                options: self.policy.geolocation,
                store: self.store.as_ref(),
                region: self.policy.region.as_ref(),
            };
            scan_for_auto_check_in(&ctx, &sections, student, now).await
        };

        if let Err(AttendanceError::PermissionDenied) = &outcome {
            self.mark_denied("platform denied position during scan")?;
        }
        outcome
    }

    // Timers

    /// Apply a timer fire. Stale fires are ignored.
    pub fn handle_timer(
        &mut self,
        fired: TimerFired,
        now: DateTime<Local>,
    ) -> AttendanceResult<Option<CoreEvent>> {
        match &fired.key {
            TimerKey::PermissionExpiry => {
                if !self.permission.is_current_timer(&fired) {
                    debug!(generation = fired.generation, "Stale permission timer ignored");
                    return Ok(None);
                }
                self.apply_revoke(RevokeReason::Expired)
            }
            TimerKey::SessionAutoEnd(session_id) => {
                if !self.sessions.is_current_timer(session_id, &fired) {
                    debug!(
                        session_id = %session_id,
                        generation = fired.generation,
                        "Stale session timer ignored"
                    );
                    return Ok(None);
                }
                self.finish_session(session_id, SessionEndReason::DurationElapsed, now)
            }
        }
    }

    // Internals

    async fn acquire_fix(&mut self) -> AttendanceResult<Coordinate> {
        match self.geolocator.current_position(self.policy.geolocation).await {
            Ok(position) => Ok(position),
            Err(e) => {
                let error = AttendanceError::from(e);
                if error == AttendanceError::PermissionDenied {
                    self.mark_denied("platform denied position")?;
                }
                warn!(error = %error, "Position fix failed");
                Err(error)
            }
        }
    }

    fn save_permission(&self) -> AttendanceResult<()> {
        self.store.save_permission(self.permission.state())?;
        Ok(())
    }

    fn arm_permission_expiry(&mut self, now: DateTime<Local>) {
        if let Some(remaining) = self.permission.remaining(now) {
            let task = self
                .scheduler
                .schedule(TimerKey::PermissionExpiry, remaining);
            self.permission.arm(task);
        }
    }

    fn expire_if_due(&mut self, now: DateTime<Local>) -> AttendanceResult<Option<CoreEvent>> {
        if self.permission.is_expired_at(now) {
            return self.apply_revoke(RevokeReason::Expired);
        }
        Ok(None)
    }

    fn apply_revoke(&mut self, reason: RevokeReason) -> AttendanceResult<Option<CoreEvent>> {
        if !self.permission.revoke(reason) {
            return Ok(None);
        }
        self.save_permission()?;

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::PermissionRevoked { reason }));

        info!(reason = ?reason, "Location permission revoked");
        Ok(Some(CoreEvent::PermissionRevoked { reason }))
    }

    fn mark_denied(&mut self, reason: &str) -> AttendanceResult<Option<CoreEvent>> {
        if !self.permission.deny() {
            return Ok(None);
        }
        self.save_permission()?;

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::PermissionDenied {
                reason: reason.to_string(),
            }));

        warn!(reason, "Location permission denied");
        Ok(Some(CoreEvent::PermissionDenied))
    }

    /// End `session_id` if it is still Active. Returns None otherwise.
    fn finish_session(
        &mut self,
        session_id: &SessionId,
        reason: SessionEndReason,
        now: DateTime<Local>,
    ) -> AttendanceResult<Option<CoreEvent>> {
        self.sessions.untrack(session_id);

        let Some(session) = self.store.get_session(session_id)? else {
            return Ok(None);
        };
        if !self.store.end_session(session_id, now)? {
            debug!(session_id = %session_id, "Session was not active");
            return Ok(None);
        }

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::SessionEnded {
                session_id: session_id.clone(),
                reason,
            }));

        info!(
            session_id = %session_id,
            section_id = %session.section_id,
            reason = ?reason,
            attendees = session.attendee_ids.len(),
            "Session ended"
        );

        Ok(Some(CoreEvent::SessionEnded {
            session_id: session_id.clone(),
            section_id: session.section_id,
            reason,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_api::{CheckInStatus, PermissionStatus};
    use rollcall_platform::{MockPlatform, PlatformError};
    use rollcall_store::SqliteStore;
    use std::time::Duration;

    fn manila() -> Coordinate {
        Coordinate::new(14.5995, 120.9842).unwrap()
    }

    struct Harness {
        engine: AttendanceEngine,
        platform: Arc<MockPlatform>,
        store: Arc<SqliteStore>,
        timers: mpsc::UnboundedReceiver<TimerFired>,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let platform = Arc::new(MockPlatform::at(manila()));
        let mut engine = AttendanceEngine::new(
            Policy::default(),
            store.clone(),
            platform.clone(),
            platform.clone(),
        )
        .unwrap();
        let timers = engine.take_timer_events().unwrap();

        Harness {
            engine,
            platform,
            store,
            timers,
        }
    }

    fn add_section(engine: &AttendanceEngine, id: &str) -> SectionId {
        engine
            .create_section(NewSection {
                id: SectionId::new(id),
                name: "Grade 7 - Rizal".into(),
                subject: "Mathematics".into(),
                teacher_id: UserId::new("teacher-1"),
                check_in_location: manila(),
                radius_meters: None,
            })
            .unwrap()
            .id
    }

    #[tokio::test(start_paused = true)]
    async fn grant_opens_window_with_fresh_fix() {
        let mut h = harness();

        let event = h
            .engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();
        let Some(CoreEvent::PermissionGranted {
            granted_at,
            expires_at,
            ..
        }) = event
        else {
            panic!("expected grant");
        };
        assert_eq!(expires_at - granted_at, chrono::Duration::hours(24));

        let options = h.platform.last_options().unwrap();
        assert_eq!(options.maximum_age, Duration::ZERO);
        assert_eq!(options.timeout, Duration::from_secs(10));

        // Persisted
        let stored = h.store.load_permission().unwrap().unwrap();
        assert_eq!(stored.status, PermissionStatus::Granted);
        assert!(stored.is_consistent());

        // Idempotent while granted
        let again = h
            .engine
            .request_permission(PromptContext::CheckIn)
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(h.platform.prompts().len(), 1);
        assert_eq!(h.platform.fix_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn declined_prompt_denies_until_resync() {
        let mut h = harness();
        h.platform.set_consent(false);

        let err = h
            .engine
            .request_permission(PromptContext::General)
            .await
            .unwrap_err();
        assert_eq!(err, AttendanceError::PermissionDenied);
        assert_eq!(h.engine.permission().status, PermissionStatus::Denied);
        assert_eq!(h.platform.fix_requests(), 0);

        h.platform.set_consent(true);
        let err = h
            .engine
            .request_permission(PromptContext::General)
            .await
            .unwrap_err();
        assert_eq!(err, AttendanceError::PermissionPreviouslyDenied);
        assert_eq!(h.platform.prompts().len(), 1);

        let event = h
            .engine
            .sync_platform_permission(PlatformPermission::Prompt)
            .unwrap();
        assert_eq!(event, Some(CoreEvent::PermissionRestored));
        assert!(h
            .engine
            .request_permission(PromptContext::General)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn platform_failure_denies_with_reason() {
        let mut h = harness();
        h.platform.fail_with(PlatformError::Timeout);

        let err = h
            .engine
            .request_permission(PromptContext::Session)
            .await
            .unwrap_err();
        assert_eq!(err, AttendanceError::Timeout);
        assert_eq!(h.engine.permission().status, PermissionStatus::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expires_and_clears_auto_check_in() {
        let mut h = harness();
        let student = UserId::new("student-1");
        h.engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();
        h.engine
            .set_auto_check_in(&student, true, rollcall_util::now())
            .await
            .unwrap();

        let fired = h.timers.recv().await.unwrap();
        assert_eq!(fired.key, TimerKey::PermissionExpiry);

        let event = h.engine.handle_timer(fired, rollcall_util::now()).unwrap();
        assert_eq!(
            event,
            Some(CoreEvent::PermissionRevoked {
                reason: RevokeReason::Expired
            })
        );
        let state = h.engine.permission();
        assert_eq!(state.status, PermissionStatus::NotGranted);
        assert!(!state.auto_check_in);
        assert!(!h.store.load_permission().unwrap().unwrap().auto_check_in);
    }

    #[tokio::test(start_paused = true)]
    async fn extend_supersedes_pending_expiry() {
        let mut h = harness();
        h.engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(12 * 3600)).await;
        let extend_at = rollcall_util::now() + chrono::Duration::hours(12);
        let event = h.engine.extend(extend_at).unwrap();
        assert_eq!(
            event,
            CoreEvent::PermissionExtended {
                expires_at: extend_at + chrono::Duration::hours(24)
            }
        );
        assert_eq!(h.engine.permission().granted_at, Some(extend_at));

        // The original 24h mark passes without a fire
        tokio::time::sleep(Duration::from_secs(13 * 3600)).await;
        assert!(h.timers.try_recv().is_err());
        assert!(h.engine.permission().is_granted());
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_cancels_expiry() {
        let mut h = harness();
        h.engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();

        let event = h.engine.revoke().unwrap();
        assert_eq!(
            event,
            Some(CoreEvent::PermissionRevoked {
                reason: RevokeReason::UserRevoked
            })
        );
        assert!(h.engine.revoke().unwrap().is_none());
        assert_eq!(
            h.engine.extend(rollcall_util::now()),
            Err(AttendanceError::PermissionNotGranted)
        );

        tokio::time::sleep(Duration::from_secs(25 * 3600)).await;
        assert!(h.timers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn one_active_session_per_section() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let now = rollcall_util::now();

        h.engine
            .start_session(&section, StartSession::default(), now)
            .unwrap();
        let err = h
            .engine
            .start_session(&section, StartSession::default(), now)
            .unwrap_err();
        assert_eq!(err, AttendanceError::SessionAlreadyActive);

        let missing = h
            .engine
            .start_session(&SectionId::new("nope"), StartSession::default(), now)
            .unwrap_err();
        assert!(matches!(missing, AttendanceError::SectionNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_end_fires_once_duration_elapses() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let now = rollcall_util::now();

        let started = h
            .engine
            .start_session(
                &section,
                StartSession {
                    duration_minutes: 1,
                    auto_end: true,
                    ..StartSession::default()
                },
                now,
            )
            .unwrap();
        let CoreEvent::SessionStarted { session_id, .. } = started else {
            panic!("expected start");
        };

        let fired = h.timers.recv().await.unwrap();
        let event = h
            .engine
            .handle_timer(fired, now + chrono::Duration::minutes(1))
            .unwrap();
        assert!(matches!(
            event,
            Some(CoreEvent::SessionEnded {
                reason: SessionEndReason::DurationElapsed,
                ..
            })
        ));

        let session = h.engine.session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Ended);
        assert!(h.engine.tracked_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_end_cancels_auto_end() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let now = rollcall_util::now();

        let CoreEvent::SessionStarted { session_id, .. } = h
            .engine
            .start_session(
                &section,
                StartSession {
                    duration_minutes: 5,
                    auto_end: true,
                    ..StartSession::default()
                },
                now,
            )
            .unwrap()
        else {
            panic!("expected start");
        };

        h.engine.end_session(&session_id, now).unwrap();
        assert_eq!(
            h.engine.end_session(&session_id, now),
            Err(AttendanceError::NoActiveSession)
        );

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(h.timers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn status_lists_tracked_sessions_by_end() {
        let mut h = harness();
        let math = add_section(&h.engine, "math-7");
        let science = add_section(&h.engine, "science-7");
        let now = rollcall_util::now();

        h.engine
            .start_session(&math, StartSession::default(), now)
            .unwrap();
        h.engine
            .start_session(
                &science,
                StartSession {
                    duration_minutes: 30,
                    auto_end: true,
                    ..StartSession::default()
                },
                now,
            )
            .unwrap();

        let status = h.engine.status();
        assert!(status.store_ok);
        assert_eq!(status.permission.status, PermissionStatus::NotGranted);
        assert_eq!(status.sessions.len(), 2);

        let first = &status.sessions[0];
        assert_eq!(first.section_id, science);
        assert!(first.auto_end);
        assert_eq!(first.scheduled_end, now + chrono::Duration::minutes(30));

        let second = &status.sessions[1];
        assert_eq!(second.section_id, math);
        assert!(!second.auto_end);
    }

    #[tokio::test(start_paused = true)]
    async fn double_check_in_admits_once() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let student = UserId::new("student-1");
        let now = rollcall_util::now();

        h.engine
            .request_permission(PromptContext::CheckIn)
            .await
            .unwrap();
        h.engine
            .start_session(&section, StartSession::default(), now)
            .unwrap();

        let first = h.engine.check_in(&section, &student, now).await.unwrap();
        assert!(first.is_admitted());
        assert_eq!(first.record().unwrap().status, CheckInStatus::Present);

        let second = h.engine.check_in(&section, &student, now).await.unwrap();
        assert_eq!(second.error(), Some(&AttendanceError::AlreadyCheckedIn));
    }

    #[tokio::test(start_paused = true)]
    async fn check_in_without_permission_needs_location() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let now = rollcall_util::now();
        h.engine
            .start_session(&section, StartSession::default(), now)
            .unwrap();

        let result = h
            .engine
            .check_in(&section, &UserId::new("student-1"), now)
            .await
            .unwrap();
        assert_eq!(result.error(), Some(&AttendanceError::LocationRequired));
        assert_eq!(h.platform.fix_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn location_free_session_admits_without_fix() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let now = rollcall_util::now();
        h.engine
            .start_session(
                &section,
                StartSession {
                    require_location: false,
                    ..StartSession::default()
                },
                now,
            )
            .unwrap();

        let result = h
            .engine
            .check_in(&section, &UserId::new("student-1"), now)
            .await
            .unwrap();
        let record = result.record().unwrap();
        assert_eq!(record.distance_meters, 0.0);
        assert_eq!(record.location, None);
        assert_eq!(h.platform.fix_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn check_in_without_session() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");

        let err = h
            .engine
            .check_in(&section, &UserId::new("student-1"), rollcall_util::now())
            .await
            .unwrap_err();
        assert_eq!(err, AttendanceError::NoActiveSession);
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_auto_check_in_scans_immediately() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let student = UserId::new("student-1");
        let now = rollcall_util::now();

        assert!(h.engine.join_section(&section, &student).unwrap());
        h.engine
            .start_session(&section, StartSession::default(), now)
            .unwrap();

        // Preference on without permission: stored, no scan
        let results = h.engine.set_auto_check_in(&student, true, now).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(h.platform.fix_requests(), 0);

        h.engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();
        let results = h.engine.set_auto_check_in(&student, true, now).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].record().unwrap().status,
            CheckInStatus::PresentAuto
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resume_expires_stale_window_and_ends_elapsed_sessions() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let now = rollcall_util::now();

        h.engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();
        h.engine
            .start_session(
                &section,
                StartSession {
                    duration_minutes: 30,
                    auto_end: true,
                    ..StartSession::default()
                },
                now,
            )
            .unwrap();

        let later = now + chrono::Duration::hours(25);
        let events = h.engine.resume(None, later).await.unwrap();

        assert!(events.contains(&CoreEvent::PermissionRevoked {
            reason: RevokeReason::Expired
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            CoreEvent::SessionEnded {
                reason: SessionEndReason::DurationElapsed,
                ..
            }
        )));
        assert!(h.engine.active_session(&section).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_rearms_live_window_and_scans() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let student = UserId::new("student-1");
        let now = rollcall_util::now();

        h.engine.join_section(&section, &student).unwrap();
        h.engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();
        h.engine.set_auto_check_in(&student, true, now).await.unwrap();
        h.engine
            .start_session(&section, StartSession::default(), now)
            .unwrap();

        let events = h.engine.resume(Some(&student), now).await.unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, CoreEvent::CheckedIn { .. })));
        assert!(h.engine.permission().is_granted());
        assert_eq!(h.engine.tracked_sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn platform_denial_during_check_in_denies_permission() {
        let mut h = harness();
        let section = add_section(&h.engine, "math-7");
        let now = rollcall_util::now();

        h.engine
            .request_permission(PromptContext::General)
            .await
            .unwrap();
        h.engine
            .start_session(&section, StartSession::default(), now)
            .unwrap();
        h.platform.fail_with(PlatformError::PermissionDenied);

        let err = h
            .engine
            .check_in(&section, &UserId::new("student-1"), now)
            .await
            .unwrap_err();
        assert_eq!(err, AttendanceError::PermissionDenied);
        assert_eq!(h.engine.permission().status, PermissionStatus::Denied);
        assert!(h.engine.permission().is_consistent());
    }

    #[test]
    fn section_radius_is_bounded() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let platform = Arc::new(MockPlatform::new());
        let engine =
            AttendanceEngine::new(Policy::default(), store, platform.clone(), platform).unwrap();

        let err = engine
            .create_section(NewSection {
                id: SectionId::new("math-7"),
                name: "Grade 7".into(),
                subject: "Mathematics".into(),
                teacher_id: UserId::new("teacher-1"),
                check_in_location: manila(),
                radius_meters: Some(200.0),
            })
            .unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidRadius { .. }));
    }
}
