//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rollcall_api::{
    CheckInRecord, CheckInStatus, Coordinate, PermissionState, Section, Session, SessionStatus,
};
use rollcall_util::{SectionId, SessionId, UserId};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AuditEvent, CheckInCommit, Store, StoreError, StoreResult};

const SESSION_COLUMNS: &str = "id, section_id, latitude, longitude, radius_meters, status, \
     require_location, started_at, duration_minutes, auto_end, ended_at";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                subject TEXT NOT NULL,
                teacher_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_meters REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS section_members (
                section_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (section_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                section_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_meters REAL NOT NULL,
                status TEXT NOT NULL,
                require_location INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL,
                auto_end INTEGER NOT NULL,
                ended_at TEXT
            );

            -- Attendee set; the primary key makes "add if absent" atomic
            CREATE TABLE IF NOT EXISTS session_attendees (
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (session_id, user_id)
            );

            -- Check-in records (append-only)
            CREATE TABLE IF NOT EXISTS check_ins (
                session_id TEXT NOT NULL,
                section_id TEXT NOT NULL,
                student_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                latitude REAL,
                longitude REAL,
                distance_meters REAL NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (session_id, student_id)
            );

            -- Location permission (single row)
            CREATE TABLE IF NOT EXISTS permission (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_sessions_section ON sessions(section_id, status);
            CREATE INDEX IF NOT EXISTS idx_members_user ON section_members(user_id);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Raw session row before timestamp and enum conversion
struct SessionRow {
    id: String,
    section_id: String,
    latitude: f64,
    longitude: f64,
    radius_meters: f64,
    status: String,
    require_location: bool,
    started_at: String,
    duration_minutes: i64,
    auto_end: bool,
    ended_at: Option<String>,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            section_id: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            radius_meters: row.get(4)?,
            status: row.get(5)?,
            require_location: row.get(6)?,
            started_at: row.get(7)?,
            duration_minutes: row.get(8)?,
            auto_end: row.get(9)?,
            ended_at: row.get(10)?,
        })
    }

    fn into_session(self, attendee_ids: BTreeSet<UserId>) -> StoreResult<Session> {
        let id = SessionId::parse(&self.id)
            .ok_or_else(|| StoreError::Serialization(format!("bad session id {}", self.id)))?;
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Serialization(format!("bad session status {}", self.status)))?;
        let duration_minutes = u32::try_from(self.duration_minutes).map_err(|_| {
            StoreError::Serialization(format!("bad duration {}", self.duration_minutes))
        })?;
        let ended_at = self.ended_at.as_deref().map(parse_timestamp).transpose()?;

        Ok(Session {
            id,
            section_id: SectionId::new(self.section_id),
            location: Coordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            radius_meters: self.radius_meters,
            status,
            attendee_ids,
            require_location: self.require_location,
            started_at: parse_timestamp(&self.started_at)?,
            duration_minutes,
            auto_end: self.auto_end,
            ended_at,
        })
    }
}

fn parse_timestamp(s: &str) -> StoreResult<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| StoreError::Serialization(format!("bad timestamp {}: {}", s, e)))
}

fn load_attendees(conn: &Connection, session_id: &str) -> StoreResult<BTreeSet<UserId>> {
    let mut stmt = conn.prepare("SELECT user_id FROM session_attendees WHERE session_id = ?")?;
    let rows = stmt.query_map([session_id], |row| row.get::<_, String>(0))?;

    let mut attendees = BTreeSet::new();
    for row in rows {
        attendees.insert(UserId::new(row?));
    }
    Ok(attendees)
}

fn load_sessions(conn: &Connection, rows: Vec<SessionRow>) -> StoreResult<Vec<Session>> {
    rows.into_iter()
        .map(|row| {
            let attendees = load_attendees(conn, &row.id)?;
            row.into_session(attendees)
        })
        .collect()
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.lock()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = parse_timestamp(&timestamp_str)?;
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn put_section(&self, section: &Section) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            INSERT INTO sections (id, name, subject, teacher_id, latitude, longitude, radius_meters)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id)
            DO UPDATE SET name = excluded.name,
                          subject = excluded.subject,
                          teacher_id = excluded.teacher_id,
                          latitude = excluded.latitude,
                          longitude = excluded.longitude,
                          radius_meters = excluded.radius_meters
            "#,
            params![
                section.id.as_str(),
                section.name,
                section.subject,
                section.teacher_id.as_str(),
                section.check_in_location.latitude,
                section.check_in_location.longitude,
                section.check_in_radius_meters,
            ],
        )?;

        debug!(section_id = %section.id, "Section saved");
        Ok(())
    }

    fn get_section(&self, section_id: &SectionId) -> StoreResult<Option<Section>> {
        let conn = self.lock()?;

        let section = conn
            .query_row(
                "SELECT id, name, subject, teacher_id, latitude, longitude, radius_meters \
                 FROM sections WHERE id = ?",
                [section_id.as_str()],
                |row| {
                    Ok(Section {
                        id: SectionId::new(row.get::<_, String>(0)?),
                        name: row.get(1)?,
                        subject: row.get(2)?,
                        teacher_id: UserId::new(row.get::<_, String>(3)?),
                        check_in_location: Coordinate {
                            latitude: row.get(4)?,
                            longitude: row.get(5)?,
                        },
                        check_in_radius_meters: row.get(6)?,
                    })
                },
            )
            .optional()?;

        Ok(section)
    }

    fn join_section(&self, section_id: &SectionId, user_id: &UserId) -> StoreResult<bool> {
        let conn = self.lock()?;

        let changed = conn.execute(
            "INSERT OR IGNORE INTO section_members (section_id, user_id) VALUES (?, ?)",
            params![section_id.as_str(), user_id.as_str()],
        )?;

        debug!(section_id = %section_id, user_id = %user_id, joined = changed == 1, "Section join");
        Ok(changed == 1)
    }

    fn joined_sections(&self, user_id: &UserId) -> StoreResult<Vec<SectionId>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT section_id FROM section_members WHERE user_id = ? ORDER BY section_id",
        )?;
        let rows = stmt.query_map([user_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut sections = Vec::new();
        for row in rows {
            sections.push(SectionId::new(row?));
        }
        Ok(sections)
    }

    fn insert_session(&self, session: &Session) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        // Conditional insert: refuses a second Active session for the section
        let inserted = tx.execute(
            r#"
            INSERT INTO sessions (id, section_id, latitude, longitude, radius_meters, status,
                                  require_location, started_at, duration_minutes, auto_end, ended_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            WHERE NOT EXISTS (
                SELECT 1 FROM sessions WHERE section_id = ?2 AND status = 'active'
            )
            "#,
            params![
                session.id.to_string(),
                session.section_id.as_str(),
                session.location.latitude,
                session.location.longitude,
                session.radius_meters,
                session.status.as_str(),
                session.require_location,
                session.started_at.to_rfc3339(),
                i64::from(session.duration_minutes),
                session.auto_end,
                session.ended_at.map(|t| t.to_rfc3339()),
            ],
        )? == 1;

        if !inserted {
            debug!(section_id = %session.section_id, "Section already has an active session");
            return Ok(false);
        }

        for attendee in &session.attendee_ids {
            tx.execute(
                "INSERT OR IGNORE INTO session_attendees (session_id, user_id) VALUES (?, ?)",
                params![session.id.to_string(), attendee.as_str()],
            )?;
        }

        tx.commit()?;
        debug!(session_id = %session.id, section_id = %session.section_id, "Session inserted");
        Ok(true)
    }

    fn get_session(&self, session_id: &SessionId) -> StoreResult<Option<Session>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS),
                [session_id.to_string()],
                SessionRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let attendees = load_attendees(&conn, &row.id)?;
                Ok(Some(row.into_session(attendees)?))
            }
            None => Ok(None),
        }
    }

    fn active_session_for_section(&self, section_id: &SectionId) -> StoreResult<Option<Session>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM sessions WHERE section_id = ? AND status = 'active' \
                     ORDER BY started_at DESC LIMIT 1",
                    SESSION_COLUMNS
                ),
                [section_id.as_str()],
                SessionRow::from_row,
            )
            .optional()?;

        match row {
            Some(row) => {
                let attendees = load_attendees(&conn, &row.id)?;
                Ok(Some(row.into_session(attendees)?))
            }
            None => Ok(None),
        }
    }

    fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        let conn = self.lock()?;

        let rows = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sessions WHERE status = 'active' ORDER BY started_at",
                SESSION_COLUMNS
            ))?;
            let mapped = stmt.query_map([], SessionRow::from_row)?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };

        load_sessions(&conn, rows)
    }

    fn end_session(&self, session_id: &SessionId, ended_at: DateTime<Local>) -> StoreResult<bool> {
        let conn = self.lock()?;

        let changed = conn.execute(
            "UPDATE sessions SET status = 'ended', ended_at = ? WHERE id = ? AND status = 'active'",
            params![ended_at.to_rfc3339(), session_id.to_string()],
        )?;

        debug!(session_id = %session_id, ended = changed == 1, "Session end requested");
        Ok(changed == 1)
    }

    fn record_check_in(&self, record: &CheckInRecord) -> StoreResult<CheckInCommit> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let session_id = record.session_id.to_string();

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE id = ?",
                [&session_id],
                |row| row.get(0),
            )
            .optional()?;

        if status.as_deref() != Some(SessionStatus::Active.as_str()) {
            return Ok(CheckInCommit::SessionNotActive);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO session_attendees (session_id, user_id) VALUES (?, ?)",
            params![session_id, record.student_id.as_str()],
        )? == 1;

        if !inserted {
            return Ok(CheckInCommit::AlreadyPresent);
        }

        tx.execute(
            r#"
            INSERT INTO check_ins (session_id, section_id, student_id, timestamp,
                                   latitude, longitude, distance_meters, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                session_id,
                record.section_id.as_str(),
                record.student_id.as_str(),
                record.timestamp.to_rfc3339(),
                record.location.map(|c| c.latitude),
                record.location.map(|c| c.longitude),
                record.distance_meters,
                record.status.as_str(),
            ],
        )?;

        tx.commit()?;
        debug!(
            session_id = %record.session_id,
            student_id = %record.student_id,
            "Check-in recorded"
        );
        Ok(CheckInCommit::Inserted)
    }

    fn check_ins_for_session(&self, session_id: &SessionId) -> StoreResult<Vec<CheckInRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT section_id, student_id, timestamp, latitude, longitude, distance_meters, status
            FROM check_ins WHERE session_id = ?
            ORDER BY timestamp, student_id
            "#,
        )?;

        let rows = stmt.query_map([session_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (section_id, student_id, timestamp, latitude, longitude, distance, status) = row?;
            let status = CheckInStatus::parse(&status)
                .ok_or_else(|| StoreError::Serialization(format!("bad check-in status {}", status)))?;
            let location = match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Some(Coordinate {
                    latitude,
                    longitude,
                }),
                _ => None,
            };

            records.push(CheckInRecord {
                session_id: session_id.clone(),
                section_id: SectionId::new(section_id),
                student_id: UserId::new(student_id),
                timestamp: parse_timestamp(&timestamp)?,
                location,
                distance_meters: distance,
                status,
            });
        }

        Ok(records)
    }

    fn load_permission(&self) -> StoreResult<Option<PermissionState>> {
        let conn = self.lock()?;

        let json: Option<String> = conn
            .query_row("SELECT state_json FROM permission WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn save_permission(&self, state: &PermissionState) -> StoreResult<()> {
        let conn = self.lock()?;
        let json = serde_json::to_string(state)?;

        conn.execute(
            r#"
            INSERT INTO permission (id, state_json)
            VALUES (1, ?)
            ON CONFLICT(id)
            DO UPDATE SET state_json = excluded.state_json
            "#,
            [json],
        )?;

        debug!(status = ?state.status, "Permission state saved");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
