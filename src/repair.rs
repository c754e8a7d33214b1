// 🩹 Name Repair - Fix rows whose names sit in the wrong columns
//
// Two kinds of legacy rows are handled before reconciliation runs:
// - merged: no first name, "first last" typed into the surname column
// - fragment: a lone first name for someone who already has a proper row
//
// Merged rows are split; a split that reproduces an existing row, and every
// fragment, is flagged as a duplicate and deleted. The result converts into a
// ReconciliationPlan so it is staged, fingerprinted and applied like any other.

use crate::error::PlanningError;
use crate::names;
use crate::planner::{FieldDelta, PlannedUpdate, ReconciliationPlan};
use crate::roster::{AuthoritativeEntry, MemberRecord};
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Where the first/surname boundary of a split came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitSource {
    /// An authoritative entry spells the same full name
    Roster,

    /// No entry matched; split at the first whitespace
    FirstWord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSplit {
    pub record: MemberRecord,
    pub first_name: String,
    pub surname: String,
    pub source: SplitSource,
}

impl NameSplit {
    pub fn label(&self) -> String {
        names::display_label(&self.first_name, Some(&self.surname))
    }

    fn to_update(&self) -> PlannedUpdate {
        PlannedUpdate {
            id: self.record.id.clone(),
            current: self.record.clone(),
            deltas: vec![
                FieldDelta::FirstName {
                    from: self.record.first_name.clone(),
                    to: self.first_name.clone(),
                },
                FieldDelta::Surname {
                    from: self.record.surname.clone(),
                    to: self.surname.clone(),
                },
            ],
            label: self.label(),
        }
    }
}

/// A row that only repeats a person another row already holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateFragment {
    pub record: MemberRecord,

    /// Id of the row that is kept
    pub duplicate_of: String,

    pub duplicate_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPlan {
    pub splits: Vec<NameSplit>,
    pub duplicates: Vec<DuplicateFragment>,
}

impl RepairPlan {
    pub fn operation_count(&self) -> usize {
        self.splits.len() + self.duplicates.len()
    }

    pub fn is_noop(&self) -> bool {
        self.operation_count() == 0
    }

    /// Splits become updates, duplicates become deletions
    pub fn to_reconciliation_plan(&self) -> ReconciliationPlan {
        ReconciliationPlan {
            decisions: Vec::new(),
            updates: self.splits.iter().map(NameSplit::to_update).collect(),
            inserts: Vec::new(),
            deletions: self.duplicates.iter().map(|d| d.record.clone()).collect(),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.to_reconciliation_plan().fingerprint()
    }

    pub fn report_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        for split in &self.splits {
            let hint = match split.source {
                SplitSource::Roster => "",
                SplitSource::FirstWord => " (guessed)",
            };
            lines.push(format!(
                "  ✂️ SPLIT: {:?} → first: {}, surname: {} (ID: {}){}",
                split.record.surname,
                split.first_name,
                split.surname,
                names::prefix(&split.record.id, 8),
                hint
            ));
        }

        for duplicate in &self.duplicates {
            lines.push(format!(
                "  🗑️ DUPLICATE: {} (ID: {}) of {} (ID: {})",
                duplicate.record.label(),
                names::prefix(&duplicate.record.id, 8),
                duplicate.duplicate_label,
                names::prefix(&duplicate.duplicate_of, 8)
            ));
        }

        lines
    }
}

// ============================================================================
// NAME REPAIRER
// ============================================================================

/// A row holding both a first name and a surname, after any split
struct Person {
    id: String,
    first: String,
    full: String,
    label: String,
}

impl Person {
    fn new(id: &str, first_name: &str, surname: &str) -> Self {
        Person {
            id: id.to_string(),
            first: names::fold(first_name),
            full: names::fold(&names::full_name(Some(first_name), surname)),
            label: names::display_label(first_name, Some(surname)),
        }
    }
}

pub struct NameRepairer;

impl NameRepairer {
    /// Find merged rows and fragments in `records` (store order).
    ///
    /// `hints` are optional authoritative entries; a merged row whose text
    /// equals an entry's full name is split the way that entry is.
    pub fn plan(records: &[MemberRecord], hints: &[AuthoritativeEntry]) -> RepairPlan {
        let mut people: Vec<Person> = records
            .iter()
            .filter(|r| !r.first_name_or_empty().trim().is_empty() && !r.surname.trim().is_empty())
            .map(|r| Person::new(&r.id, r.first_name_or_empty().trim(), r.surname.trim()))
            .collect();

        let mut plan = RepairPlan::default();
        let mut flagged: Vec<(usize, DuplicateFragment)> = Vec::new();

        for (position, record) in records.iter().enumerate() {
            if !record.has_merged_name() {
                continue;
            }
            let Some((first_name, surname, source)) = split_name(&record.surname, hints) else {
                continue;
            };

            let candidate = Person::new(&record.id, &first_name, &surname);
            if let Some(kept) = people.iter().find(|p| p.full == candidate.full) {
                debug!(id = %record.id, kept = %kept.id, "merged name duplicates existing row");
                flagged.push((position, fragment_of(record, kept)));
                continue;
            }

            people.push(candidate);
            plan.splits.push(NameSplit {
                record: record.clone(),
                first_name,
                surname,
                source,
            });
        }

        for (position, record) in records.iter().enumerate() {
            let Some(lone) = lone_name(record) else {
                continue;
            };
            let lone = names::fold(lone);
            if let Some(kept) = people.iter().find(|p| p.first == lone) {
                debug!(id = %record.id, kept = %kept.id, "first-name fragment of existing row");
                flagged.push((position, fragment_of(record, kept)));
            }
        }

        flagged.sort_by_key(|(position, _)| *position);
        plan.duplicates = flagged.into_iter().map(|(_, fragment)| fragment).collect();

        info!(
            splits = plan.splits.len(),
            duplicates = plan.duplicates.len(),
            "name repair planned"
        );
        plan
    }

    /// List the store, then plan. A failed listing aborts with no plan.
    pub fn plan_against<S: RecordStore + ?Sized>(
        store: &S,
        hints: &[AuthoritativeEntry],
    ) -> Result<RepairPlan, PlanningError> {
        let records = store.list_all()?;
        Ok(Self::plan(&records, hints))
    }
}

fn split_name(merged: &str, hints: &[AuthoritativeEntry]) -> Option<(String, String, SplitSource)> {
    let merged = merged.trim();

    let hinted = hints.iter().find_map(|entry| {
        let surname = entry.surname.as_deref()?;
        names::eq_folded(&entry.label(), merged)
            .then(|| (entry.first_name.clone(), surname.to_string(), SplitSource::Roster))
    });
    if hinted.is_some() {
        return hinted;
    }

    names::split_merged(merged)
        .map(|(first, rest)| (first.to_string(), rest.to_string(), SplitSource::FirstWord))
}

/// The single name of a row that has only one of the two columns filled,
/// with no whitespace in it
fn lone_name(record: &MemberRecord) -> Option<&str> {
    let first = record.first_name_or_empty().trim();
    let surname = record.surname.trim();

    match (first.is_empty(), surname.is_empty()) {
        (false, true) => Some(first),
        (true, false) if !surname.contains(char::is_whitespace) => Some(surname),
        _ => None,
    }
}

fn fragment_of(record: &MemberRecord, kept: &Person) -> DuplicateFragment {
    DuplicateFragment {
        record: record.clone(),
        duplicate_of: kept.id.clone(),
        duplicate_label: kept.label.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ApplyExecutor;
    use crate::roster::MemberCategory;
    use crate::store::MemoryStore;

    fn record(id: &str, first: Option<&str>, surname: &str) -> MemberRecord {
        MemberRecord::new(id, first, surname, MemberCategory::Fux)
    }

    #[test]
    fn test_merged_name_is_split_at_first_word() {
        let records = vec![record("1", None, "Leandro Polo Morawietz")];

        let plan = NameRepairer::plan(&records, &[]);

        assert_eq!(plan.splits.len(), 1);
        assert_eq!(plan.splits[0].first_name, "Leandro");
        assert_eq!(plan.splits[0].surname, "Polo Morawietz");
        assert_eq!(plan.splits[0].source, SplitSource::FirstWord);
        assert!(plan.duplicates.is_empty());
    }

    #[test]
    fn test_roster_hint_decides_split() {
        let records = vec![record("1", Some(""), "per oskar lundgren")];
        let hints = vec![AuthoritativeEntry::new("Per Oskar", Some("Lundgren"), MemberCategory::Fux)];

        let plan = NameRepairer::plan(&records, &hints);

        assert_eq!(plan.splits[0].first_name, "Per Oskar");
        assert_eq!(plan.splits[0].surname, "Lundgren");
        assert_eq!(plan.splits[0].source, SplitSource::Roster);
    }

    #[test]
    fn test_merged_copy_of_existing_row_is_duplicate() {
        let records = vec![
            record("1", None, "Theo Reichert"),
            record("2", Some("Theo"), "Reichert"),
        ];

        let plan = NameRepairer::plan(&records, &[]);

        assert!(plan.splits.is_empty());
        assert_eq!(plan.duplicates.len(), 1);
        assert_eq!(plan.duplicates[0].record.id, "1");
        assert_eq!(plan.duplicates[0].duplicate_of, "2");
    }

    #[test]
    fn test_first_name_fragments_of_split_rows() {
        let records = vec![
            record("1", Some("Johannes"), ""),
            record("2", None, "Johannes Bauer"),
            record("3", None, "Kevin"),
            record("4", None, "Jannik"),
            record("5", Some("Jannik"), "Heideprim"),
        ];

        let plan = NameRepairer::plan(&records, &[]);

        assert_eq!(plan.splits.len(), 1);
        assert_eq!(plan.splits[0].record.id, "2");

        let flagged: Vec<(&str, &str)> = plan
            .duplicates
            .iter()
            .map(|d| (d.record.id.as_str(), d.duplicate_of.as_str()))
            .collect();
        assert_eq!(flagged, vec![("1", "2"), ("4", "5")]);
    }

    #[test]
    fn test_surname_only_rows_are_left_alone() {
        let records = vec![
            record("1", Some("Johannes"), "Bauer"),
            record("2", None, "Bauer"),
        ];

        assert!(NameRepairer::plan(&records, &[]).is_noop());
    }

    #[test]
    fn test_repair_applies_and_converges() {
        let records = vec![
            record("1", None, "Elias Kalla"),
            record("2", Some("Elias"), ""),
            record("3", Some("Max"), "Pallasch"),
        ];
        let plan = NameRepairer::plan(&records, &[]);
        let lines = plan.report_lines();
        assert!(lines[0].contains("SPLIT"));
        assert!(lines[1].contains("DUPLICATE: Elias"));

        let mut store = MemoryStore::new(records);
        let report = ApplyExecutor::apply(&plan.to_reconciliation_plan(), &mut store);

        assert!(report.is_clean());
        assert_eq!(store.records().len(), 2);
        assert_eq!(store.records()[0].first_name.as_deref(), Some("Elias"));
        assert_eq!(store.records()[0].surname, "Kalla");
        assert!(NameRepairer::plan(store.records(), &[]).is_noop());
    }

    #[test]
    fn test_fingerprint_follows_operations() {
        let records = vec![record("1", None, "Theo Reichert")];
        let hints = vec![AuthoritativeEntry::new("Theo", Some("Reichert"), MemberCategory::Fux)];

        let guessed = NameRepairer::plan(&records, &[]);
        let hinted = NameRepairer::plan(&records, &hints);

        // Same split either way, so the same store calls
        assert_eq!(guessed.fingerprint(), hinted.fingerprint());
        assert_ne!(guessed.fingerprint(), RepairPlan::default().fingerprint());
    }
}
