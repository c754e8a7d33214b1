// Roster Sync - Core Library
// Reconciles the hand-maintained member roster against the member store,
// repairs legacy name rows, and syncs calendar feed events into the event table.

pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod names;
pub mod planner;
pub mod repair;
pub mod roster;
pub mod stager;
pub mod store;

// Re-export commonly used types
pub use calendar::{
    CalendarEvent, EventSchedule, EventTime, StoredEvent, SyncReport,
    list_events_from, load_events_from_path, sync_calendar_events, upcoming_events,
};
pub use config::Config;
pub use db::{
    AuditEvent, setup_database, list_members, count_members, find_members_by_full_name,
    insert_member_record, get_audit_events_for_member,
};
pub use error::{PlanningError, SessionError, StoreError};
pub use executor::{ApplyExecutor, ApplyReport, OperationKind, OperationOutcome};
pub use matcher::{IdentityMatcher, MatchCandidate, MatchTier};
pub use planner::{
    DiffPlanner, EntryDecision, EntryOutcome, FieldDelta, PlanSummary, PlannedInsert,
    PlannedUpdate, ReconciliationPlan,
};
pub use repair::{DuplicateFragment, NameRepairer, NameSplit, RepairPlan, SplitSource};
pub use roster::{
    AdminRole, AuthoritativeEntry, AuthoritativeList, MemberCategory, MemberChanges,
    MemberRecord, NewMember, CATEGORY_ORDER,
};
pub use stager::{ChangeStager, RosterSession, SessionState};
pub use store::{MemoryStore, RecordStore, SqliteStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
