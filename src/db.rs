// 🗄️ Database - SQLite schema and member row access
//
// One file holds the whole backend: members, events, registrations, meals,
// signups, announcements, expenses. Only the member table and the audit log
// have row-level helpers here; calendar events live in calendar.rs.

use crate::error::StoreError;
use crate::names;
use crate::roster::{AdminRole, MemberChanges, MemberRecord, NewMember};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Members
    // `id` keeps insertion order, `member_uuid` is the identity callers see
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_uuid TEXT UNIQUE NOT NULL,
            surname TEXT NOT NULL,
            first_name TEXT,
            full_name TEXT,
            member_type TEXT NOT NULL DEFAULT 'bursche',
            admin_role TEXT,
            password_hash TEXT,
            last_login TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Events (external_id set for rows imported from the calendar feed)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            title TEXT NOT NULL,
            date TEXT NOT NULL,
            end_date TEXT,
            time TEXT,
            meeting_time TEXT,
            location TEXT DEFAULT 'Auf dem Haus',
            description TEXT,
            category TEXT DEFAULT 'intern',
            confirmation_deadline TEXT,
            created_by TEXT REFERENCES members(member_uuid) ON DELETE SET NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS event_registrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER REFERENCES events(id) ON DELETE CASCADE,
            member_id TEXT REFERENCES members(member_uuid) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'ja',
            confirmed INTEGER DEFAULT 0,
            extras TEXT,
            guest_count INTEGER DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(event_id, member_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Meals
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            week INTEGER NOT NULL,
            day_index INTEGER NOT NULL,
            vorspeise TEXT,
            hauptgericht TEXT,
            nachspeise TEXT,
            kochteam TEXT,
            status TEXT DEFAULT 'active',
            signup_deadline TEXT DEFAULT '10:00',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(year, week, day_index)
        )",
        [],
    )?;

    // `types` is a JSON array of course names
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meal_signups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meal_id INTEGER REFERENCES meals(id) ON DELETE CASCADE,
            member_id TEXT REFERENCES members(member_uuid) ON DELETE CASCADE,
            types TEXT NOT NULL DEFAULT '[]',
            amount REAL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(meal_id, member_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Announcements
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            author_id TEXT REFERENCES members(member_uuid) ON DELETE SET NULL,
            category TEXT DEFAULT 'info',
            is_active INTEGER DEFAULT 1,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            expires_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS announcement_reads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            announcement_id INTEGER REFERENCES announcements(id) ON DELETE CASCADE,
            member_id TEXT REFERENCES members(member_uuid) ON DELETE CASCADE,
            read_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(announcement_id, member_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Expenses
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            member_id TEXT REFERENCES members(member_uuid) ON DELETE CASCADE,
            category TEXT NOT NULL,
            description TEXT,
            amount REAL NOT NULL,
            date TEXT DEFAULT CURRENT_DATE,
            recorded_by TEXT REFERENCES members(member_uuid) ON DELETE SET NULL,
            is_paid INTEGER DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Audit log (one row per member mutation)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            member_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute("CREATE INDEX IF NOT EXISTS idx_events_date ON events(date)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_event_reg_event ON event_registrations(event_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_event_reg_member ON event_registrations(member_id)",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_meals_week ON meals(year, week)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meal_signup_meal ON meal_signups(meal_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_expenses_member ON expenses(member_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_member ON audit_events(member_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// MEMBERS
// ============================================================================

const MEMBER_COLUMNS: &str = "member_uuid, first_name, surname, member_type, admin_role";

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<MemberRecord> {
    let member_type: String = row.get(3)?;
    let admin_role: Option<String> = row.get(4)?;

    Ok(MemberRecord {
        id: row.get(0)?,
        first_name: row.get(1)?,
        surname: row.get(2)?,
        category: member_type.into(),
        admin_role: admin_role.filter(|r| !r.is_empty()).map(AdminRole),
    })
}

/// Every member in insertion order
pub fn list_members(conn: &Connection) -> StoreResult<Vec<MemberRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM members ORDER BY id", MEMBER_COLUMNS))?;

    let members = stmt
        .query_map([], member_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(members)
}

pub fn get_member(conn: &Connection, member_id: &str) -> StoreResult<Option<MemberRecord>> {
    let member = conn
        .query_row(
            &format!("SELECT {} FROM members WHERE member_uuid = ?1", MEMBER_COLUMNS),
            [member_id],
            member_from_row,
        )
        .optional()?;

    Ok(member)
}

/// Insert with a fresh UUID
pub fn insert_member(conn: &Connection, member: &NewMember) -> StoreResult<MemberRecord> {
    let record = MemberRecord {
        id: uuid::Uuid::new_v4().to_string(),
        first_name: Some(member.first_name.clone()),
        surname: member.surname.clone().unwrap_or_default(),
        category: member.category.clone(),
        admin_role: None,
    };

    insert_member_record(conn, &record)?;
    Ok(record)
}

/// Insert a record keeping its id (seeding and imports)
pub fn insert_member_record(conn: &Connection, record: &MemberRecord) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO members (member_uuid, first_name, surname, full_name, member_type, admin_role)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.first_name,
            record.surname,
            names::full_name(record.first_name.as_deref(), &record.surname),
            record.category.as_str(),
            record.admin_role.as_ref().map(|r| r.0.as_str()),
        ],
    )?;

    Ok(())
}

/// Apply `changes` and keep `full_name` in sync. `None` when the id is unknown.
pub fn update_member(
    conn: &Connection,
    member_id: &str,
    changes: &MemberChanges,
) -> StoreResult<Option<MemberRecord>> {
    let Some(mut record) = get_member(conn, member_id)? else {
        return Ok(None);
    };

    if changes.is_empty() {
        return Ok(Some(record));
    }
    changes.apply_to(&mut record);

    conn.execute(
        "UPDATE members
         SET first_name = ?1, surname = ?2, full_name = ?3, member_type = ?4
         WHERE member_uuid = ?5",
        params![
            record.first_name,
            record.surname,
            names::full_name(record.first_name.as_deref(), &record.surname),
            record.category.as_str(),
            member_id,
        ],
    )?;

    Ok(Some(record))
}

/// True when a row was removed
pub fn delete_member(conn: &Connection, member_id: &str) -> StoreResult<bool> {
    let removed = conn.execute("DELETE FROM members WHERE member_uuid = ?1", [member_id])?;
    Ok(removed > 0)
}

/// Login lookup: case-insensitive match on the derived full name
pub fn find_members_by_full_name(conn: &Connection, full_name: &str) -> StoreResult<Vec<MemberRecord>> {
    let wanted = full_name.trim();
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, full_name FROM members WHERE full_name IS NOT NULL ORDER BY id",
        MEMBER_COLUMNS
    ))?;

    // SQLite's LOWER() only folds ASCII, so compare in Rust
    let rows = stmt
        .query_map([], |row| {
            let stored: String = row.get(5)?;
            Ok((member_from_row(row)?, stored))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|(_, stored)| names::eq_folded(stored, wanted))
        .map(|(record, _)| record)
        .collect())
}

pub fn set_admin_role(
    conn: &Connection,
    member_id: &str,
    role: Option<&AdminRole>,
) -> StoreResult<bool> {
    let changed = conn.execute(
        "UPDATE members SET admin_role = ?1 WHERE member_uuid = ?2",
        params![role.map(|r| r.0.as_str()), member_id],
    )?;
    Ok(changed > 0)
}

pub fn count_members(conn: &Connection) -> StoreResult<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM members", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// One member mutation, as written by the store adapter
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub member_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl AuditEvent {
    pub fn new(event_type: &str, member_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            member_id: member_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_audit_event(conn: &Connection, event: &AuditEvent) -> StoreResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO audit_events (event_id, timestamp, event_type, member_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.member_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Oldest first
pub fn get_audit_events_for_member(conn: &Connection, member_id: &str) -> StoreResult<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, member_id, data, actor
         FROM audit_events
         WHERE member_id = ?1
         ORDER BY id",
    )?;

    let events = stmt
        .query_map([member_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(4)?;

            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
                })?
                .with_timezone(&Utc);
            let data = serde_json::from_str(&data_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
            })?;

            Ok(AuditEvent {
                event_id: row.get(0)?,
                timestamp,
                event_type: row.get(2)?,
                member_id: row.get(3)?,
                data,
                actor: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}
