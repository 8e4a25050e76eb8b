//! Session lifecycle tracking

use chrono::{DateTime, Local};
use rollcall_api::{Coordinate, Session};
use rollcall_util::{SectionId, SessionId};
use std::collections::HashMap;

use crate::{ScheduledTask, TimerFired};

/// Options for opening an attendance session
#[derive(Debug, Clone, PartialEq)]
pub struct StartSession {
    /// Check-in point; defaults to the section's
    pub location: Option<Coordinate>,
    /// Admission radius; defaults to the section's
    pub radius_meters: Option<f64>,
    pub require_location: bool,
    pub duration_minutes: u32,
    /// End automatically once `duration_minutes` have elapsed
    pub auto_end: bool,
}

impl Default for StartSession {
    fn default() -> Self {
        Self {
            location: None,
            radius_meters: None,
            require_location: true,
            duration_minutes: 60,
            auto_end: false,
        }
    }
}

/// An Active session known to the engine
#[derive(Debug)]
pub struct TrackedSession {
    pub section_id: SectionId,
    pub scheduled_end: DateTime<Local>,
    auto_end: Option<ScheduledTask>,
}

impl TrackedSession {
    pub fn has_auto_end(&self) -> bool {
        self.auto_end.is_some()
    }
}

/// Active sessions keyed by id, each holding its own auto-end timer
#[derive(Debug, Default)]
pub struct SessionBook {
    sessions: HashMap<SessionId, TrackedSession>,
}

impl SessionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `session`, replacing (and cancelling) any previous entry
    pub fn track(&mut self, session: &Session, auto_end: Option<ScheduledTask>) {
        self.sessions.insert(
            session.id.clone(),
            TrackedSession {
                section_id: session.section_id.clone(),
                scheduled_end: session.scheduled_end(),
                auto_end,
            },
        );
    }

    /// Stop tracking; drops the auto-end timer
    pub fn untrack(&mut self, session_id: &SessionId) -> Option<TrackedSession> {
        self.sessions.remove(session_id)
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&TrackedSession> {
        self.sessions.get(session_id)
    }

    /// Whether `fired` is the live auto-end timer of `session_id`
    pub fn is_current_timer(&self, session_id: &SessionId, fired: &TimerFired) -> bool {
        self.sessions
            .get(session_id)
            .and_then(|s| s.auto_end.as_ref())
            .is_some_and(|task| task.matches(fired))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, &TrackedSession)> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Scheduler, TimerKey};
    use rollcall_api::SessionStatus;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn make_session() -> Session {
        Session {
            id: SessionId::new(),
            section_id: SectionId::new("math-7"),
            location: Coordinate::new(14.5995, 120.9842).unwrap(),
            radius_meters: 10.0,
            status: SessionStatus::Active,
            attendee_ids: BTreeSet::new(),
            require_location: true,
            started_at: rollcall_util::now(),
            duration_minutes: 45,
            auto_end: true,
            ended_at: None,
        }
    }

    #[test]
    fn start_defaults() {
        let options = StartSession::default();
        assert!(options.require_location);
        assert!(!options.auto_end);
        assert_eq!(options.duration_minutes, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn untracking_cancels_auto_end() {
        let (scheduler, mut rx) = Scheduler::new();
        let mut book = SessionBook::new();
        let session = make_session();

        let task = scheduler.schedule(
            TimerKey::SessionAutoEnd(session.id.clone()),
            Duration::from_secs(45 * 60),
        );
        book.track(&session, Some(task));
        assert!(book.get(&session.id).unwrap().has_auto_end());
        assert_eq!(
            book.get(&session.id).unwrap().scheduled_end,
            session.scheduled_end()
        );

        book.untrack(&session.id);
        assert!(book.is_empty());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retracking_supersedes_old_timer() {
        let (scheduler, _rx) = Scheduler::new();
        let mut book = SessionBook::new();
        let session = make_session();
        let key = TimerKey::SessionAutoEnd(session.id.clone());

        let first = scheduler.schedule(key.clone(), Duration::from_secs(60));
        let stale = TimerFired {
            key: key.clone(),
            generation: first.generation(),
        };
        book.track(&session, Some(first));
        assert!(book.is_current_timer(&session.id, &stale));

        book.track(&session, Some(scheduler.schedule(key, Duration::from_secs(60))));
        assert!(!book.is_current_timer(&session.id, &stale));
        assert_eq!(book.len(), 1);
    }
}
