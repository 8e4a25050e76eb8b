//! Location permission state machine
//!
//! States: NotGranted -> Granted -> NotGranted (expiry or revoke), any -> Denied.
//! The expiry timer lives next to the state it governs and is dropped on
//! every transition that supersedes the current window.

use chrono::{DateTime, Local};
use rollcall_api::{
    AttendanceError, AttendanceResult, PermissionState, PermissionStatus, PlatformPermission,
    RevokeReason,
};
use std::time::Duration;

use crate::{ScheduledTask, TimerFired};

/// What `request_permission` has to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestGate {
    /// Permission is already Granted; nothing to do
    AlreadyGranted,
    /// Show the consent prompt and acquire a fix
    NeedsConsent,
}

/// Result of applying a platform permission signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSync {
    Unchanged,
    /// Moved to Denied
    Denied,
    /// Left Denied for NotGranted
    Restored,
}

/// Owns the persisted permission state and its expiry timer
#[derive(Debug)]
pub struct PermissionTracker {
    state: PermissionState,
    window: chrono::Duration,
    expiry: Option<ScheduledTask>,
}

impl PermissionTracker {
    pub fn new(state: PermissionState, window: chrono::Duration) -> Self {
        Self {
            state,
            window,
            expiry: None,
        }
    }

    pub fn state(&self) -> &PermissionState {
        &self.state
    }

    pub fn status(&self) -> PermissionStatus {
        self.state.status
    }

    pub fn is_granted(&self) -> bool {
        self.state.is_granted()
    }

    pub fn auto_check_in(&self) -> bool {
        self.state.auto_check_in
    }

    /// Granted with the auto-check-in preference on
    pub fn auto_scan_enabled(&self) -> bool {
        self.is_granted() && self.state.auto_check_in
    }

    pub fn check_request(&self) -> AttendanceResult<RequestGate> {
        match self.state.status {
            PermissionStatus::Granted => Ok(RequestGate::AlreadyGranted),
            PermissionStatus::Denied => Err(AttendanceError::PermissionPreviouslyDenied),
            PermissionStatus::NotGranted => Ok(RequestGate::NeedsConsent),
        }
    }

    /// Open a fresh activity window starting at `now`. Returns the new expiry.
    pub fn grant(&mut self, now: DateTime<Local>) -> DateTime<Local> {
        self.expiry = None;
        let expires_at = now + self.window;
        self.state.status = PermissionStatus::Granted;
        self.state.granted_at = Some(now);
        self.state.expires_at = Some(expires_at);
        expires_at
    }

    /// Replace the current window with one starting at `now`
    pub fn extend(&mut self, now: DateTime<Local>) -> AttendanceResult<DateTime<Local>> {
        if !self.is_granted() {
            return Err(AttendanceError::PermissionNotGranted);
        }
        Ok(self.grant(now))
    }

    /// Leave Granted for NotGranted. Returns false if not Granted.
    ///
    /// Auto-expiry also turns the auto-check-in preference off.
    pub fn revoke(&mut self, reason: RevokeReason) -> bool {
        if !self.is_granted() {
            return false;
        }

        let auto_check_in = match reason {
            RevokeReason::Expired => false,
            RevokeReason::UserRevoked => self.state.auto_check_in,
        };
        self.expiry = None;
        self.state = PermissionState::not_granted(auto_check_in);
        true
    }

    /// Move to Denied. Returns false if already Denied.
    pub fn deny(&mut self) -> bool {
        if self.state.status == PermissionStatus::Denied {
            return false;
        }
        self.expiry = None;
        self.state = PermissionState {
            status: PermissionStatus::Denied,
            granted_at: None,
            expires_at: None,
            auto_check_in: self.state.auto_check_in,
        };
        true
    }

    /// Apply the platform's reported grant state
    pub fn sync_platform(&mut self, permission: PlatformPermission) -> PlatformSync {
        match (permission, self.state.status) {
            (PlatformPermission::Denied, PermissionStatus::Denied) => PlatformSync::Unchanged,
            (PlatformPermission::Denied, _) => {
                self.deny();
                PlatformSync::Denied
            }
            (PlatformPermission::Prompt | PlatformPermission::Granted, PermissionStatus::Denied) => {
                self.state = PermissionState::not_granted(self.state.auto_check_in);
                PlatformSync::Restored
            }
            _ => PlatformSync::Unchanged,
        }
    }

    pub fn set_auto_check_in(&mut self, enabled: bool) -> bool {
        let changed = self.state.auto_check_in != enabled;
        self.state.auto_check_in = enabled;
        changed
    }

    pub fn is_expired_at(&self, now: DateTime<Local>) -> bool {
        self.is_granted() && self.state.is_expired_at(now)
    }

    /// Time left in the activity window
    pub fn remaining(&self, now: DateTime<Local>) -> Option<Duration> {
        if !self.is_granted() {
            return None;
        }
        self.state
            .expires_at
            .map(|expires_at| rollcall_util::saturating_until(expires_at, now))
    }

    /// Attach the expiry timer for the current window
    pub fn arm(&mut self, task: ScheduledTask) {
        self.expiry = Some(task);
    }

    /// Drop the expiry timer without changing state
    pub fn disarm(&mut self) {
        self.expiry = None;
    }

    pub fn has_pending_expiry(&self) -> bool {
        self.expiry.is_some()
    }

    /// Whether `fired` is the expiry timer of the current window
    pub fn is_current_timer(&self, fired: &TimerFired) -> bool {
        self.is_granted()
            && self
                .expiry
                .as_ref()
                .is_some_and(|task| task.matches(fired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Scheduler, TimerKey};

    fn tracker() -> PermissionTracker {
        PermissionTracker::new(PermissionState::default(), chrono::Duration::hours(24))
    }

    #[test]
    fn grant_opens_a_24_hour_window() {
        let mut tracker = tracker();
        let now = rollcall_util::now();

        assert_eq!(tracker.check_request(), Ok(RequestGate::NeedsConsent));
        let expires_at = tracker.grant(now);

        let state = tracker.state();
        assert_eq!(state.status, PermissionStatus::Granted);
        assert_eq!(state.granted_at, Some(now));
        assert_eq!(expires_at - now, chrono::Duration::hours(24));
        assert!(state.is_consistent());
        assert_eq!(tracker.check_request(), Ok(RequestGate::AlreadyGranted));
    }

    #[test]
    fn extend_replaces_the_window() {
        let mut tracker = tracker();
        let start = rollcall_util::now();
        tracker.grant(start);

        let later = start + chrono::Duration::hours(5);
        let expires_at = tracker.extend(later).unwrap();

        assert_eq!(tracker.state().granted_at, Some(later));
        assert_eq!(expires_at, later + chrono::Duration::hours(24));
    }

    #[test]
    fn extend_requires_granted() {
        let mut tracker = tracker();
        assert_eq!(
            tracker.extend(rollcall_util::now()),
            Err(AttendanceError::PermissionNotGranted)
        );
        tracker.deny();
        assert_eq!(
            tracker.extend(rollcall_util::now()),
            Err(AttendanceError::PermissionNotGranted)
        );
    }

    #[test]
    fn expiry_clears_auto_check_in_but_revoke_keeps_it() {
        let mut tracker = tracker();
        tracker.set_auto_check_in(true);

        tracker.grant(rollcall_util::now());
        assert!(tracker.revoke(RevokeReason::UserRevoked));
        assert!(tracker.auto_check_in());
        assert!(tracker.state().is_consistent());

        tracker.grant(rollcall_util::now());
        assert!(tracker.revoke(RevokeReason::Expired));
        assert!(!tracker.auto_check_in());
        assert_eq!(tracker.status(), PermissionStatus::NotGranted);

        // Revoking while not granted is a no-op
        assert!(!tracker.revoke(RevokeReason::UserRevoked));
    }

    #[test]
    fn denied_blocks_requests_until_platform_resync() {
        let mut tracker = tracker();
        tracker.grant(rollcall_util::now());

        assert_eq!(
            tracker.sync_platform(PlatformPermission::Denied),
            PlatformSync::Denied
        );
        assert_eq!(
            tracker.check_request(),
            Err(AttendanceError::PermissionPreviouslyDenied)
        );
        assert!(tracker.state().is_consistent());

        assert_eq!(
            tracker.sync_platform(PlatformPermission::Denied),
            PlatformSync::Unchanged
        );
        assert_eq!(
            tracker.sync_platform(PlatformPermission::Prompt),
            PlatformSync::Restored
        );
        assert_eq!(tracker.status(), PermissionStatus::NotGranted);

        // A granted signal alone never opens a window
        assert_eq!(
            tracker.sync_platform(PlatformPermission::Granted),
            PlatformSync::Unchanged
        );
        assert_eq!(tracker.status(), PermissionStatus::NotGranted);
    }

    #[test]
    fn expiry_is_inclusive() {
        let mut tracker = tracker();
        let now = rollcall_util::now();
        tracker.grant(now);

        assert!(!tracker.is_expired_at(now + chrono::Duration::hours(23)));
        assert!(tracker.is_expired_at(now + chrono::Duration::hours(24)));
        assert_eq!(
            tracker.remaining(now + chrono::Duration::hours(23)),
            Some(Duration::from_secs(3600))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_timer_is_not_current() {
        let (scheduler, _rx) = Scheduler::new();
        let mut tracker = tracker();
        let now = rollcall_util::now();

        tracker.grant(now);
        let first = scheduler.schedule(TimerKey::PermissionExpiry, Duration::from_secs(10));
        let stale = TimerFired {
            key: TimerKey::PermissionExpiry,
            generation: first.generation(),
        };
        tracker.arm(first);
        assert!(tracker.is_current_timer(&stale));

        tracker.extend(now).unwrap();
        assert!(!tracker.has_pending_expiry());
        tracker.arm(scheduler.schedule(TimerKey::PermissionExpiry, Duration::from_secs(10)));
        assert!(!tracker.is_current_timer(&stale));

        tracker.revoke(RevokeReason::UserRevoked);
        assert!(!tracker.has_pending_expiry());
    }
}
