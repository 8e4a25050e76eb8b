//! Shared types for sections, sessions and check-ins

use chrono::{DateTime, Local};
use rollcall_util::{SectionId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::AttendanceError;

/// A point on the Earth's surface, in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate, rejecting non-finite or out-of-range values
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, AttendanceError> {
        let coord = Self {
            latitude,
            longitude,
        };
        if coord.is_valid() {
            Ok(coord)
        } else {
            Err(AttendanceError::InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Rectangular operating region; coordinates outside it are refused
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl BoundingBox {
    /// Inclusive containment check
    pub fn contains(&self, coord: &Coordinate) -> bool {
        coord.latitude >= self.min_latitude
            && coord.latitude <= self.max_latitude
            && coord.longitude >= self.min_longitude
            && coord.longitude <= self.max_longitude
    }
}

/// Options for a platform position request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the platform may return; zero forces a fresh fix
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_millis(10_000),
            maximum_age: Duration::ZERO,
        }
    }
}

/// A class section owned by a teacher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub name: String,
    pub subject: String,
    pub teacher_id: UserId,
    pub check_in_location: Coordinate,
    pub check_in_radius_meters: f64,
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    /// Teacher ended the session
    Manual,
    /// Auto-end duration elapsed
    DurationElapsed,
}

/// An attendance session opened against a section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub section_id: SectionId,
    pub location: Coordinate,
    pub radius_meters: f64,
    pub status: SessionStatus,
    pub attendee_ids: BTreeSet<UserId>,
    pub require_location: bool,
    pub started_at: DateTime<Local>,
    pub duration_minutes: u32,
    pub auto_end: bool,
    pub ended_at: Option<DateTime<Local>>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn has_attendee(&self, user_id: &UserId) -> bool {
        self.attendee_ids.contains(user_id)
    }

    /// Add an attendee. Returns false if they were already present.
    pub fn admit(&mut self, user_id: UserId) -> bool {
        self.attendee_ids.insert(user_id)
    }

    /// When the configured duration runs out
    pub fn scheduled_end(&self) -> DateTime<Local> {
        self.started_at + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn mark_ended(&mut self, at: DateTime<Local>) {
        self.status = SessionStatus::Ended;
        self.ended_at = Some(at);
    }
}

/// Attendance mark written for an admitted student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    Present,
    PresentAuto,
}

impl CheckInStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckInStatus::Present => "present",
            CheckInStatus::PresentAuto => "present_auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(CheckInStatus::Present),
            "present_auto" => Some(CheckInStatus::PresentAuto),
            _ => None,
        }
    }
}

/// Which path requested the admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInMode {
    /// Student pressed the check-in button
    Manual,
    /// Background auto-check-in scan
    Auto,
}

impl CheckInMode {
    pub fn status(&self) -> CheckInStatus {
        match self {
            CheckInMode::Manual => CheckInStatus::Present,
            CheckInMode::Auto => CheckInStatus::PresentAuto,
        }
    }
}

/// Immutable attendance record, one per (session, student)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInRecord {
    pub session_id: SessionId,
    pub section_id: SectionId,
    pub student_id: UserId,
    pub timestamp: DateTime<Local>,
    pub location: Option<Coordinate>,
    pub distance_meters: f64,
    pub status: CheckInStatus,
}

/// Outcome of an admission evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    Admitted(CheckInRecord),
    Rejected(AttendanceError),
}

/// Admission result, carrying the computed distance whatever the outcome
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionResult {
    pub session_id: SessionId,
    pub section_id: SectionId,
    pub student_id: UserId,
    /// None when no distance was computed (duplicate, missing location)
    pub distance_meters: Option<f64>,
    pub decision: AdmissionDecision,
}

impl AdmissionResult {
    pub fn is_admitted(&self) -> bool {
        matches!(self.decision, AdmissionDecision::Admitted(_))
    }

    pub fn record(&self) -> Option<&CheckInRecord> {
        match &self.decision {
            AdmissionDecision::Admitted(record) => Some(record),
            AdmissionDecision::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<&AttendanceError> {
        match &self.decision {
            AdmissionDecision::Admitted(_) => None,
            AdmissionDecision::Rejected(err) => Some(err),
        }
    }

    /// Turn into a plain Result for callers that only care about success
    pub fn into_result(self) -> Result<CheckInRecord, AttendanceError> {
        match self.decision {
            AdmissionDecision::Admitted(record) => Ok(record),
            AdmissionDecision::Rejected(err) => Err(err),
        }
    }
}
