// 📅 Calendar Sync - Upsert feed events into the local event table
//
// Events are keyed by the feed's external id. Sync inserts or updates, it
// never deletes. All-day and timed values map differently onto the split
// date / time / end_date columns.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

// ============================================================================
// EVENT TIME
// ============================================================================

/// A feed time value: a bare date (all-day) or a wall-clock date and time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventTime {
    AllDay(NaiveDate),
    Timed(NaiveDateTime),
}

impl EventTime {
    /// Accepts `2025-05-01`, `2025-05-01T19:30[:00]` (also with a space) and
    /// RFC 3339 with an offset, which is kept as local wall-clock time.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();

        if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
            return Ok(EventTime::AllDay(date));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(EventTime::Timed(dt.naive_local()));
        }
        for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
                return Ok(EventTime::Timed(dt));
            }
        }

        Err(anyhow!("Unrecognized event time: {:?}", value))
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            EventTime::AllDay(date) => *date,
            EventTime::Timed(dt) => dt.date(),
        }
    }

    /// `None` for all-day values
    pub fn time(&self) -> Option<NaiveTime> {
        match self {
            EventTime::AllDay(_) => None,
            EventTime::Timed(dt) => Some(dt.time()),
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::AllDay(_))
    }
}

impl TryFrom<String> for EventTime {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        EventTime::parse(&value)
    }
}

impl From<EventTime> for String {
    fn from(time: EventTime) -> Self {
        time.to_string()
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::AllDay(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            EventTime::Timed(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

// ============================================================================
// CALENDAR EVENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Feed identifier (iCalendar UID)
    #[serde(alias = "uid")]
    pub external_id: String,

    #[serde(default)]
    pub summary: String,

    pub start: EventTime,

    #[serde(default)]
    pub end: Option<EventTime>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Values for the split date/time columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchedule {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub end_date: Option<NaiveDate>,
}

impl CalendarEvent {
    /// Map start/end onto `date`, `time`, `end_date`.
    ///
    /// An all-day end is exclusive in the feed (the day after the last day),
    /// so it is moved back one day. `end_date` stays empty unless the event
    /// runs past its start date. An exclusive end on the earliest
    /// representable date has no day before it and is dropped.
    pub fn schedule(&self) -> EventSchedule {
        let date = self.start.date();

        let last_day = self.end.and_then(|end| match end {
            EventTime::AllDay(exclusive) => exclusive.pred_opt(),
            EventTime::Timed(dt) => Some(dt.date()),
        });

        EventSchedule {
            date,
            time: self.start.time(),
            end_date: last_day.filter(|day| *day > date),
        }
    }
}

/// Read a JSON array of events exported from the feed
pub fn load_events_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<CalendarEvent>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read calendar export: {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse calendar events JSON")
}

/// Events starting on or after `today`, earliest first (all-day before timed
/// on the same day)
pub fn upcoming_events(events: &[CalendarEvent], today: NaiveDate) -> Vec<CalendarEvent> {
    let mut upcoming: Vec<CalendarEvent> = events
        .iter()
        .filter(|event| event.start.date() >= today)
        .cloned()
        .collect();
    upcoming.sort_by_key(|event| (event.start.date(), event.start.time()));
    upcoming
}

// ============================================================================
// SYNC
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Upsert every event by external id inside one transaction
pub fn sync_calendar_events(conn: &Connection, events: &[CalendarEvent]) -> Result<SyncReport> {
    let tx = conn.unchecked_transaction()?;
    let mut report = SyncReport::default();

    for event in events {
        let external_id = event.external_id.trim();
        if external_id.is_empty() {
            warn!(summary = %event.summary, "calendar event without external id skipped");
            report.skipped += 1;
            continue;
        }

        let exists = tx
            .query_row(
                "SELECT 1 FROM events WHERE external_id = ?1",
                [external_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let schedule = event.schedule();
        tx.execute(
            "INSERT INTO events (external_id, title, date, end_date, time, location, description)
             VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, 'Auf dem Haus'), ?7)
             ON CONFLICT(external_id) DO UPDATE SET
                title = excluded.title,
                date = excluded.date,
                end_date = excluded.end_date,
                time = excluded.time,
                location = excluded.location,
                description = excluded.description,
                updated_at = CURRENT_TIMESTAMP",
            params![
                external_id,
                event.summary.trim(),
                schedule.date.format(DATE_FORMAT).to_string(),
                schedule.end_date.map(|d| d.format(DATE_FORMAT).to_string()),
                schedule.time.map(|t| t.format(TIME_FORMAT).to_string()),
                event.location.as_deref().filter(|l| !l.trim().is_empty()),
                event.description,
            ],
        )
        .with_context(|| format!("Failed to upsert calendar event {}", external_id))?;

        debug!(external_id, exists, "calendar event synced");
        if exists {
            report.updated += 1;
        } else {
            report.inserted += 1;
        }
    }

    tx.commit()?;
    info!(
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        "calendar sync finished"
    );
    Ok(report)
}

// ============================================================================
// STORED EVENTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub external_id: Option<String>,
    pub title: String,
    pub date: String,
    pub end_date: Option<String>,
    pub time: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Rows dated on or after `from`, by date then time
pub fn list_events_from(conn: &Connection, from: NaiveDate) -> Result<Vec<StoredEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, external_id, title, date, end_date, time, location, description
         FROM events
         WHERE date >= ?1
         ORDER BY date, time",
    )?;

    let events = stmt
        .query_map([from.format(DATE_FORMAT).to_string()], |row| {
            Ok(StoredEvent {
                id: row.get(0)?,
                external_id: row.get(1)?,
                title: row.get(2)?,
                date: row.get(3)?,
                end_date: row.get(4)?,
                time: row.get(5)?,
                location: row.get(6)?,
                description: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn event(id: &str, start: &str, end: Option<&str>) -> CalendarEvent {
        CalendarEvent {
            external_id: id.to_string(),
            summary: format!("Event {}", id),
            start: EventTime::parse(start).unwrap(),
            end: end.map(|e| EventTime::parse(e).unwrap()),
            location: None,
            description: None,
        }
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_parse_event_times() {
        assert_eq!(EventTime::parse("2025-05-01").unwrap(), EventTime::AllDay(date("2025-05-01")));
        assert!(!EventTime::parse("2025-05-01T19:30").unwrap().is_all_day());
        assert_eq!(
            EventTime::parse("2025-05-01T19:30:00+02:00").unwrap().time(),
            NaiveTime::from_hms_opt(19, 30, 0)
        );
        assert_eq!(
            EventTime::parse("2025-05-01 08:15").unwrap().time(),
            NaiveTime::from_hms_opt(8, 15, 0)
        );
        assert!(EventTime::parse("None").is_err());
    }

    #[test]
    fn test_all_day_end_becomes_inclusive() {
        let single = event("a", "2025-06-14", Some("2025-06-15")).schedule();
        assert_eq!(single.date, date("2025-06-14"));
        assert_eq!(single.time, None);
        assert_eq!(single.end_date, None);

        let weekend = event("b", "2025-06-14", Some("2025-06-16")).schedule();
        assert_eq!(weekend.end_date, Some(date("2025-06-15")));
    }

    #[test]
    fn test_all_day_end_on_earliest_date() {
        let mut earliest = event("min", "2025-06-14", None);
        earliest.start = EventTime::AllDay(NaiveDate::MIN);
        earliest.end = Some(EventTime::AllDay(NaiveDate::MIN));

        let schedule = earliest.schedule();
        assert_eq!(schedule.date, NaiveDate::MIN);
        assert_eq!(schedule.end_date, None);

        let json = format!(
            r#"{{"uid": "min", "start": "{0}", "end": "{0}"}}"#,
            NaiveDate::MIN.format(DATE_FORMAT)
        );
        let parsed: CalendarEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.end, Some(EventTime::AllDay(NaiveDate::MIN)));

        let conn = test_db();
        let report = sync_calendar_events(&conn, &[parsed]).unwrap();
        assert_eq!(report.inserted, 1);
    }

    #[test]
    fn test_timed_schedule() {
        let evening = event("c", "2025-06-14T20:00:00", Some("2025-06-14T23:00:00")).schedule();
        assert_eq!(evening.time, NaiveTime::from_hms_opt(20, 0, 0));
        assert_eq!(evening.end_date, None);

        let overnight = event("d", "2025-06-14T20:00:00", Some("2025-06-15T02:00:00")).schedule();
        assert_eq!(overnight.end_date, Some(date("2025-06-15")));
    }

    #[test]
    fn test_sync_inserts_then_updates() {
        let conn = test_db();
        let mut events = vec![
            event("uid-1", "2025-06-14", Some("2025-06-16")),
            event("uid-2", "2025-06-20T19:30:00", None),
        ];

        let first = sync_calendar_events(&conn, &events).unwrap();
        assert_eq!(first, SyncReport { inserted: 2, updated: 0, skipped: 0 });

        events[1].summary = "Stiftungsfest".to_string();
        events[1].location = Some("Festsaal".to_string());
        let second = sync_calendar_events(&conn, &events).unwrap();
        assert_eq!(second, SyncReport { inserted: 0, updated: 2, skipped: 0 });

        let stored = list_events_from(&conn, date("2025-01-01")).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].end_date.as_deref(), Some("2025-06-15"));
        assert_eq!(stored[0].time, None);
        assert_eq!(stored[0].location.as_deref(), Some("Auf dem Haus"));
        assert_eq!(stored[1].title, "Stiftungsfest");
        assert_eq!(stored[1].time.as_deref(), Some("19:30"));
        assert_eq!(stored[1].location.as_deref(), Some("Festsaal"));
    }

    #[test]
    fn test_sync_never_deletes() {
        let conn = test_db();
        sync_calendar_events(&conn, &[event("keep", "2025-07-01", None)]).unwrap();
        sync_calendar_events(&conn, &[]).unwrap();

        assert_eq!(list_events_from(&conn, date("2025-01-01")).unwrap().len(), 1);
    }

    #[test]
    fn test_sync_skips_missing_external_id() {
        let conn = test_db();
        let report = sync_calendar_events(&conn, &[event("  ", "2025-07-01", None)]).unwrap();

        assert_eq!(report.skipped, 1);
        assert!(list_events_from(&conn, date("2025-01-01")).unwrap().is_empty());
    }

    #[test]
    fn test_upcoming_events_filter_and_order() {
        let events = vec![
            event("late", "2025-06-20T19:30:00", None),
            event("past", "2025-05-01", None),
            event("allday", "2025-06-20", None),
            event("early", "2025-06-10T10:00:00", None),
        ];

        let upcoming = upcoming_events(&events, date("2025-06-01"));
        let ids: Vec<&str> = upcoming.iter().map(|e| e.external_id.as_str()).collect();

        assert_eq!(ids, vec!["early", "allday", "late"]);
    }

    #[test]
    fn test_events_deserialize_from_feed_export() {
        let json = r#"[
            {"uid": "x1@google.com", "summary": "Kneipe", "start": "2025-06-14T20:00:00+02:00",
             "end": "2025-06-14T23:59:00+02:00", "location": null, "description": null},
            {"external_id": "x2", "start": "2025-06-21", "end": "2025-06-22"}
        ]"#;

        let events: Vec<CalendarEvent> = serde_json::from_str(json).unwrap();

        assert_eq!(events[0].external_id, "x1@google.com");
        assert!(events[1].start.is_all_day());
        assert_eq!(events[1].summary, "");
    }
}
