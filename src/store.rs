// 🏪 Record Store - The four operations reconciliation needs from a member store
//
// SqliteStore is the real adapter. MemoryStore backs tests and dry runs and
// can be told to fail specific calls.

use crate::db::{self, AuditEvent, StoreResult};
use crate::error::StoreError;
use crate::roster::{MemberChanges, MemberRecord, NewMember};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;

// ============================================================================
// RECORD STORE TRAIT
// ============================================================================

/// Member store as seen by the planner and the executor.
///
/// `list_all` must return records in a stable order (insertion order for the
/// bundled stores): the matcher breaks ties by it.
pub trait RecordStore {
    fn list_all(&self) -> StoreResult<Vec<MemberRecord>>;

    /// Updated record, or `None` when no record has this id
    fn update(&mut self, id: &str, changes: &MemberChanges) -> StoreResult<Option<MemberRecord>>;

    fn insert(&mut self, member: &NewMember) -> StoreResult<MemberRecord>;

    /// False when no record had this id
    fn delete(&mut self, id: &str) -> StoreResult<bool>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,

    /// Written to the audit log with every mutation
    actor: String,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        db::setup_database(&conn).context("Failed to set up database schema")?;
        Ok(SqliteStore {
            conn,
            actor: "roster_sync".to_string(),
        })
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl RecordStore for SqliteStore {
    fn list_all(&self) -> StoreResult<Vec<MemberRecord>> {
        db::list_members(&self.conn)
    }

    fn update(&mut self, id: &str, changes: &MemberChanges) -> StoreResult<Option<MemberRecord>> {
        let tx = self.conn.transaction()?;
        let updated = db::update_member(&tx, id, changes)?;
        if updated.is_some() && !changes.is_empty() {
            let event = AuditEvent::new("member_updated", id, serde_json::to_value(changes)?, &self.actor);
            db::insert_audit_event(&tx, &event)?;
        }
        tx.commit()?;
        Ok(updated)
    }

    fn insert(&mut self, member: &NewMember) -> StoreResult<MemberRecord> {
        let tx = self.conn.transaction()?;
        let record = db::insert_member(&tx, member)?;
        let event = AuditEvent::new("member_added", &record.id, serde_json::to_value(member)?, &self.actor);
        db::insert_audit_event(&tx, &event)?;
        tx.commit()?;
        Ok(record)
    }

    fn delete(&mut self, id: &str) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        let snapshot = db::get_member(&tx, id)?;
        let removed = db::delete_member(&tx, id)?;
        if let Some(record) = snapshot.filter(|_| removed) {
            let event = AuditEvent::new("member_deleted", id, serde_json::to_value(&record)?, &self.actor);
            db::insert_audit_event(&tx, &event)?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

// ============================================================================
// MEMORY STORE
// ============================================================================

/// Vec-backed store. Inserted records get ids `new-1`, `new-2`, ...
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<MemberRecord>,
    next_id: usize,
    listing_failure: Option<String>,
    failing_ids: HashSet<String>,
    fail_inserts: bool,
}

impl MemoryStore {
    pub fn new(records: Vec<MemberRecord>) -> Self {
        MemoryStore {
            records,
            ..Default::default()
        }
    }

    /// Store whose `list_all` always fails
    pub fn failing_listing(message: &str) -> Self {
        MemoryStore {
            listing_failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Make update and delete calls on `id` fail
    pub fn fail_writes_for(mut self, id: &str) -> Self {
        self.failing_ids.insert(id.to_string());
        self
    }

    pub fn fail_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    pub fn records(&self) -> &[MemberRecord] {
        &self.records
    }

    fn check_writable(&self, id: &str) -> StoreResult<()> {
        if self.failing_ids.contains(id) {
            return Err(StoreError::Unavailable(format!("write to {} rejected", id)));
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn list_all(&self) -> StoreResult<Vec<MemberRecord>> {
        match &self.listing_failure {
            Some(message) => Err(StoreError::Unavailable(message.clone())),
            None => Ok(self.records.clone()),
        }
    }

    fn update(&mut self, id: &str, changes: &MemberChanges) -> StoreResult<Option<MemberRecord>> {
        self.check_writable(id)?;
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        changes.apply_to(record);
        Ok(Some(record.clone()))
    }

    fn insert(&mut self, member: &NewMember) -> StoreResult<MemberRecord> {
        if self.fail_inserts {
            return Err(StoreError::Unavailable("inserts rejected".to_string()));
        }
        self.next_id += 1;
        let record = MemberRecord {
            id: format!("new-{}", self.next_id),
            first_name: Some(member.first_name.clone()),
            surname: member.surname.clone().unwrap_or_default(),
            category: member.category.clone(),
            admin_role: None,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn delete(&mut self, id: &str) -> StoreResult<bool> {
        self.check_writable(id)?;
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        Ok(self.records.len() < before)
    }
}
