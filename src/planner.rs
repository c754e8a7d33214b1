// 📋 Diff Planner - Three-way diff of the authoritative list against the store
//
// Output is a ReconciliationPlan: updates (with field deltas), inserts and
// deletions. Planning never touches the store; running it twice on the same
// inputs gives the same plan, fingerprint included.

use crate::error::PlanningError;
use crate::matcher::{IdentityMatcher, MatchTier};
use crate::names;
use crate::roster::{
    AuthoritativeEntry, MemberCategory, MemberChanges, MemberRecord, NewMember,
};
use crate::store::RecordStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// FIELD DELTAS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldDelta {
    FirstName { from: Option<String>, to: String },
    Surname { from: String, to: String },
    Category { from: MemberCategory, to: MemberCategory },
}

impl FieldDelta {
    pub fn describe(&self) -> String {
        match self {
            FieldDelta::FirstName { from, to } => {
                format!("first: {}→{}", from.as_deref().unwrap_or(""), to)
            }
            FieldDelta::Surname { from, to } => format!("surname: {}→{}", from, to),
            FieldDelta::Category { from, to } => format!("type: {}→{}", from, to),
        }
    }
}

// ============================================================================
// PLAN OPERATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedUpdate {
    pub id: String,

    /// Record as it was when the plan was made
    pub current: MemberRecord,

    pub deltas: Vec<FieldDelta>,

    pub label: String,
}

impl PlannedUpdate {
    /// Field map sent to the store
    pub fn changes(&self) -> MemberChanges {
        let mut changes = MemberChanges::default();
        for delta in &self.deltas {
            match delta {
                FieldDelta::FirstName { to, .. } => changes.first_name = Some(to.clone()),
                FieldDelta::Surname { to, .. } => changes.surname = Some(to.clone()),
                FieldDelta::Category { to, .. } => changes.category = Some(to.clone()),
            }
        }
        changes
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedInsert {
    pub first_name: String,
    pub surname: Option<String>,
    pub category: MemberCategory,
}

impl PlannedInsert {
    pub fn label(&self) -> String {
        names::display_label(&self.first_name, self.surname.as_deref())
    }

    pub fn to_new_member(&self) -> NewMember {
        NewMember {
            first_name: self.first_name.clone(),
            surname: self.surname.clone(),
            category: self.category.clone(),
        }
    }
}

// ============================================================================
// PER-ENTRY DECISIONS (reporting surface)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EntryOutcome {
    Unchanged { id: String, tier: MatchTier, score: u32 },
    Update { id: String, tier: MatchTier, score: u32 },
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDecision {
    pub entry: AuthoritativeEntry,
    pub outcome: EntryOutcome,
}

// ============================================================================
// RECONCILIATION PLAN
// ============================================================================

/// The staged change set. It has no identity of its own: the next planning
/// run replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    /// One decision per authoritative entry, in list order
    pub decisions: Vec<EntryDecision>,

    pub updates: Vec<PlannedUpdate>,

    pub inserts: Vec<PlannedInsert>,

    /// Store records no authoritative entry claimed
    pub deletions: Vec<MemberRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub unchanged: usize,
    pub updates: usize,
    pub inserts: usize,
    pub deletions: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unchanged, {} updates, {} inserts, {} deletions",
            self.unchanged, self.updates, self.inserts, self.deletions
        )
    }
}

impl ReconciliationPlan {
    pub fn summary(&self) -> PlanSummary {
        let unchanged = self
            .decisions
            .iter()
            .filter(|d| matches!(d.outcome, EntryOutcome::Unchanged { .. }))
            .count();

        PlanSummary {
            unchanged,
            updates: self.updates.len(),
            inserts: self.inserts.len(),
            deletions: self.deletions.len(),
        }
    }

    pub fn operation_count(&self) -> usize {
        self.updates.len() + self.inserts.len() + self.deletions.len()
    }

    /// True when applying would change nothing
    pub fn is_noop(&self) -> bool {
        self.operation_count() == 0
    }

    /// Ids claimed by some authoritative entry
    pub fn matched_ids(&self) -> HashSet<&str> {
        self.decisions
            .iter()
            .filter_map(|d| match &d.outcome {
                EntryOutcome::Unchanged { id, .. } | EntryOutcome::Update { id, .. } => {
                    Some(id.as_str())
                }
                EntryOutcome::Insert => None,
            })
            .collect()
    }

    /// SHA-256 over the operations, in order.
    ///
    /// Two plans with the same fingerprint perform the same store calls, so
    /// an operator can confirm that the plan being applied is the one reviewed.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();

        for update in &self.updates {
            hasher.update(format!("U\u{1f}{}", update.id));
            for delta in &update.deltas {
                hasher.update(format!("\u{1f}{}", delta.describe()));
            }
            hasher.update("\u{1e}");
        }
        for insert in &self.inserts {
            hasher.update(format!(
                "I\u{1f}{}\u{1f}{}\u{1f}{}\u{1e}",
                insert.first_name,
                insert.surname.as_deref().unwrap_or("\u{0}"),
                insert.category
            ));
        }
        for deletion in &self.deletions {
            hasher.update(format!("D\u{1f}{}\u{1e}", deletion.id));
        }

        format!("{:x}", hasher.finalize())
    }

    /// Console lines, one per entry decision and one per deletion
    pub fn report_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        for decision in &self.decisions {
            let label = decision.entry.label();
            let category = &decision.entry.category;
            match &decision.outcome {
                EntryOutcome::Unchanged { .. } => {
                    lines.push(format!("  ✓ OK: {} ({})", label, category));
                }
                EntryOutcome::Update { id, .. } => {
                    let changes = self
                        .updates
                        .iter()
                        .find(|u| &u.id == id)
                        .map(|u| {
                            u.deltas
                                .iter()
                                .map(FieldDelta::describe)
                                .collect::<Vec<_>>()
                                .join(", ")
                        })
                        .unwrap_or_default();
                    lines.push(format!("  ✏️ UPDATE {} ({}): {}", label, short_id(id), changes));
                }
                EntryOutcome::Insert => {
                    lines.push(format!("  ➕ INSERT: {} ({})", label, category));
                }
            }
        }

        for record in &self.deletions {
            lines.push(format!(
                "  🗑️ DELETE: {} (ID: {})",
                record.label(),
                short_id(&record.id)
            ));
        }

        lines
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize reconciliation plan")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json_pretty()?)
            .with_context(|| format!("Failed to write plan file: {:?}", path))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {:?}", path))?;
        serde_json::from_str(&content).context("Failed to parse plan JSON")
    }
}

fn short_id(id: &str) -> &str {
    names::prefix(id, 8)
}

// ============================================================================
// DIFF PLANNER
// ============================================================================

pub struct DiffPlanner {
    matcher: IdentityMatcher,
}

impl DiffPlanner {
    pub fn new() -> Self {
        DiffPlanner {
            matcher: IdentityMatcher::new(),
        }
    }

    /// Compute the plan.
    ///
    /// `entries` are matched in the order given and each match consumes its
    /// record, so reordering entries can change the result. `records` must be
    /// in store retrieval order.
    pub fn plan(
        &self,
        entries: &[AuthoritativeEntry],
        records: &[MemberRecord],
    ) -> ReconciliationPlan {
        let mut plan = ReconciliationPlan::default();
        let mut consumed: HashSet<String> = HashSet::new();

        for entry in entries {
            let Some(found) = self.matcher.find_best_match(entry, records, &consumed) else {
                debug!(entry = %entry.label(), "no match, insert planned");
                plan.inserts.push(PlannedInsert {
                    first_name: entry.first_name.clone(),
                    surname: entry.surname.clone(),
                    category: entry.category.clone(),
                });
                plan.decisions.push(EntryDecision {
                    entry: entry.clone(),
                    outcome: EntryOutcome::Insert,
                });
                continue;
            };

            let record = found.record;
            consumed.insert(record.id.clone());

            let deltas = field_deltas(entry, record);
            debug!(
                entry = %entry.label(),
                id = %record.id,
                tier = found.tier.as_str(),
                score = found.score,
                deltas = deltas.len(),
                "matched"
            );

            let outcome = if deltas.is_empty() {
                EntryOutcome::Unchanged {
                    id: record.id.clone(),
                    tier: found.tier,
                    score: found.score,
                }
            } else {
                plan.updates.push(PlannedUpdate {
                    id: record.id.clone(),
                    current: record.clone(),
                    deltas,
                    label: entry.label(),
                });
                EntryOutcome::Update {
                    id: record.id.clone(),
                    tier: found.tier,
                    score: found.score,
                }
            };

            plan.decisions.push(EntryDecision {
                entry: entry.clone(),
                outcome,
            });
        }

        plan.deletions = records
            .iter()
            .filter(|record| !consumed.contains(&record.id))
            .cloned()
            .collect();

        info!(summary = %plan.summary(), "reconciliation planned");
        plan
    }

    /// List the store, then plan. A failed listing aborts with no plan.
    pub fn plan_against<S: RecordStore + ?Sized>(
        &self,
        entries: &[AuthoritativeEntry],
        store: &S,
    ) -> Result<ReconciliationPlan, PlanningError> {
        let records = store.list_all()?;
        Ok(self.plan(entries, &records))
    }
}

impl Default for DiffPlanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Field-level differences between what the list says and what the record holds.
///
/// An absent authoritative surname never produces a surname delta, so a
/// surname corrected earlier is not wiped by a first-name-only entry.
fn field_deltas(entry: &AuthoritativeEntry, record: &MemberRecord) -> Vec<FieldDelta> {
    let mut deltas = Vec::new();

    if record.first_name_or_empty() != entry.first_name {
        deltas.push(FieldDelta::FirstName {
            from: record.first_name.clone(),
            to: entry.first_name.clone(),
        });
    }

    if let Some(surname) = entry.surname.as_deref().filter(|s| !s.is_empty()) {
        if record.surname != surname {
            deltas.push(FieldDelta::Surname {
                from: record.surname.clone(),
                to: surname.to_string(),
            });
        }
    }

    if record.category != entry.category {
        deltas.push(FieldDelta::Category {
            from: record.category.clone(),
            to: entry.category.clone(),
        });
    }

    deltas
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;

    fn record(id: &str, first: Option<&str>, surname: &str, category: MemberCategory) -> MemberRecord {
        MemberRecord::new(id, first, surname, category)
    }

    fn entry(first: &str, surname: Option<&str>, category: MemberCategory) -> AuthoritativeEntry {
        AuthoritativeEntry::new(first, surname, category)
    }

    #[test]
    fn test_unchanged_match() {
        let records = vec![record("1", Some("Johannes"), "Bauer", MemberCategory::Bursche)];
        let entries = vec![entry("Johannes", Some("Bauer"), MemberCategory::Bursche)];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert!(plan.is_noop());
        assert_eq!(plan.summary().unchanged, 1);
        assert!(matches!(
            &plan.decisions[0].outcome,
            EntryOutcome::Unchanged { id, tier: MatchTier::Surname, score: 150 } if id == "1"
        ));
    }

    #[test]
    fn test_surname_match_leaves_solo_record_for_deletion() {
        let records = vec![
            record("2", Some("Theo"), "Reichert", MemberCategory::Fux),
            record("3", None, "Theo", MemberCategory::Fux),
        ];
        let entries = vec![entry("Theo", Some("Reichert"), MemberCategory::Fux)];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert_eq!(plan.summary().unchanged, 1);
        assert_eq!(plan.deletions.len(), 1);
        assert_eq!(plan.deletions[0].id, "3");
    }

    #[test]
    fn test_first_name_only_entry_matches_solo_surname_record() {
        let records = vec![record("4", None, "Kevin", MemberCategory::Employee)];
        let entries = vec![entry("Kevin", None, MemberCategory::Employee)];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert!(plan.inserts.is_empty());
        assert!(plan.deletions.is_empty());
        assert_eq!(plan.updates.len(), 1);
        // The record gains a first name but keeps its surname column
        assert_eq!(
            plan.updates[0].deltas,
            vec![FieldDelta::FirstName { from: None, to: "Kevin".to_string() }]
        );
    }

    #[test]
    fn test_fuzzy_match_updates_surname_spelling() {
        let records = vec![record("5", None, "Heideprim", MemberCategory::Fux)];
        let entries = vec![entry("Jannik", Some("Heidepriem"), MemberCategory::Fux)];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert!(matches!(
            &plan.decisions[0].outcome,
            EntryOutcome::Update { tier: MatchTier::FuzzySurname, score: 30, .. }
        ));
        let changes = plan.updates[0].changes();
        assert_eq!(changes.first_name.as_deref(), Some("Jannik"));
        assert_eq!(changes.surname.as_deref(), Some("Heidepriem"));
        assert_eq!(changes.category, None);
    }

    #[test]
    fn test_absent_surname_never_erases_existing_surname() {
        let records = vec![record("6", Some("Marco"), "Nedliko", MemberCategory::Bursche)];
        let entries = vec![entry("Marco", None, MemberCategory::Fux)];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert_eq!(plan.updates.len(), 1);
        assert!(plan.updates[0]
            .deltas
            .iter()
            .all(|d| !matches!(d, FieldDelta::Surname { .. })));
        assert_eq!(plan.updates[0].changes().surname, None);
    }

    #[test]
    fn test_empty_first_name_differs_from_name() {
        let records = vec![record("7", Some(""), "Lippert", MemberCategory::Bursche)];
        let entries = vec![entry("Michael", Some("Lippert"), MemberCategory::Bursche)];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert_eq!(
            plan.updates[0].deltas,
            vec![FieldDelta::FirstName { from: Some(String::new()), to: "Michael".to_string() }]
        );
    }

    #[test]
    fn test_category_delta() {
        let records = vec![record("8", Some("Julius"), "Renner", MemberCategory::Fux)];
        let entries = vec![entry("Julius", Some("Renner"), MemberCategory::Bursche)];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert_eq!(
            plan.updates[0].deltas,
            vec![FieldDelta::Category { from: MemberCategory::Fux, to: MemberCategory::Bursche }]
        );
        assert_eq!(plan.updates[0].label, "Julius Renner");
    }

    #[test]
    fn test_unmatched_entry_is_inserted() {
        let records = vec![record("1", Some("Max"), "Pallasch", MemberCategory::Bursche)];
        let entries = vec![
            entry("Max", Some("Pallasch"), MemberCategory::Bursche),
            entry("Lorant", Some("Csöke"), MemberCategory::Bursche),
        ];

        let plan = DiffPlanner::new().plan(&entries, &records);

        assert_eq!(
            plan.inserts,
            vec![PlannedInsert {
                first_name: "Lorant".to_string(),
                surname: Some("Csöke".to_string()),
                category: MemberCategory::Bursche,
            }]
        );
        assert!(plan.deletions.is_empty());
    }

    #[test]
    fn test_matches_are_consumed_greedily_in_list_order() {
        let records = vec![
            record("10", Some("Frederik"), "Schulze", MemberCategory::Inaktiv),
            record("11", Some("Tilio"), "Schulze", MemberCategory::Inaktiv),
        ];
        let entries = vec![
            entry("Frederik", Some("Schulze"), MemberCategory::Inaktiv),
            entry("Tilio", Some("Schulze"), MemberCategory::Inaktiv),
            entry("Tilio", Some("Schulze"), MemberCategory::Inaktiv),
        ];

        let plan = DiffPlanner::new().plan(&entries, &records);

        // Duplicate entry finds nothing left to claim
        assert_eq!(plan.summary().unchanged, 2);
        assert_eq!(plan.inserts.len(), 1);
        assert!(plan.deletions.is_empty());
    }

    #[test]
    fn test_entry_order_changes_which_record_is_claimed() {
        let records = vec![record("20", Some("Per Oskar"), "Lundgren", MemberCategory::Fux)];
        let per_first = vec![
            entry("Per", Some("Lundgren"), MemberCategory::Fux),
            entry("Oskar", Some("Lundgren"), MemberCategory::Fux),
        ];
        let oskar_first: Vec<_> = per_first.iter().rev().cloned().collect();

        let a = DiffPlanner::new().plan(&per_first, &records);
        let b = DiffPlanner::new().plan(&oskar_first, &records);

        // Whoever comes first claims the record, the other is inserted
        assert_eq!(a.inserts[0].first_name, "Oskar");
        assert_eq!(b.inserts[0].first_name, "Per");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_no_id_both_matched_and_deleted() {
        let records = vec![
            record("1", Some("Johannes"), "Bauer", MemberCategory::Fux),
            record("2", None, "Johannes", MemberCategory::Fux),
            record("3", Some("Florian D."), "", MemberCategory::Fux),
            record("4", Some("Florian"), "Dreizler", MemberCategory::Fux),
        ];
        let entries = vec![
            entry("Johannes", Some("Bauer"), MemberCategory::Fux),
            entry("Florian", Some("Dreizler"), MemberCategory::Fux),
        ];

        let plan = DiffPlanner::new().plan(&entries, &records);
        let matched = plan.matched_ids();

        assert!(plan.deletions.iter().all(|r| !matched.contains(r.id.as_str())));
        assert_eq!(matched.len() + plan.deletions.len(), records.len());
    }

    #[test]
    fn test_planning_is_deterministic() {
        let records = vec![
            record("1", None, "Theo Reichert", MemberCategory::Bursche),
            record("2", Some("Theo"), "Reichert", MemberCategory::Fux),
            record("3", None, "Kevin", MemberCategory::Employee),
            record("4", Some("Lars"), "", MemberCategory::Bursche),
        ];
        let entries = vec![
            entry("Theo", Some("Reichert"), MemberCategory::Fux),
            entry("Lars", Some("Mildenberger"), MemberCategory::Bursche),
            entry("Kevin", None, MemberCategory::Employee),
            entry("Simon", Some("Walter"), MemberCategory::Inaktiv),
        ];

        let planner = DiffPlanner::new();
        let first = planner.plan(&entries, &records);
        let second = planner.plan(&entries, &records);

        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.to_json_pretty().unwrap(), second.to_json_pretty().unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_operations() {
        let records = vec![record("1", Some("Max"), "Pallasch", MemberCategory::Bursche)];
        let a = DiffPlanner::new().plan(
            &[entry("Max", Some("Pallasch"), MemberCategory::Bursche)],
            &records,
        );
        let b = DiffPlanner::new().plan(
            &[entry("Max", Some("Pallasch"), MemberCategory::Inaktiv)],
            &records,
        );

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_report_lines() {
        let records = vec![
            record("abcdef123456", Some("Julius"), "Renner", MemberCategory::Fux),
            record("zzz", None, "Ludwig", MemberCategory::Fux),
        ];
        let entries = vec![
            entry("Julius", Some("Renner"), MemberCategory::Bursche),
            entry("Kevin", None, MemberCategory::Employee),
        ];

        let lines = DiffPlanner::new().plan(&entries, &records).report_lines();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("UPDATE Julius Renner (abcdef12): type: fux→bursche"));
        assert!(lines[1].contains("INSERT: Kevin (employee)"));
        assert!(lines[2].contains("DELETE: Ludwig"));
    }

    #[test]
    fn test_plan_file_round_trip() {
        let records = vec![record("1", None, "Johannes Bauer", MemberCategory::Fux)];
        let entries = vec![
            entry("Johannes", Some("Bauer"), MemberCategory::Fux),
            entry("Elias", Some("Kalla"), MemberCategory::Fux),
        ];
        let plan = DiffPlanner::new().plan(&entries, &records);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        plan.save(&path).unwrap();
        let loaded = ReconciliationPlan::load(&path).unwrap();

        assert_eq!(loaded, plan);
        assert_eq!(loaded.fingerprint(), plan.fingerprint());
    }

    #[test]
    fn test_plan_against_store_failure_yields_no_plan() {
        let store = MemoryStore::failing_listing("connection refused");
        let result = DiffPlanner::new().plan_against(
            &[entry("Max", Some("Pallasch"), MemberCategory::Bursche)],
            &store,
        );

        assert!(matches!(
            result,
            Err(PlanningError::Store(StoreError::Unavailable(_)))
        ));
    }
}
