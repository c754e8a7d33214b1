// 👥 Roster Model - Member records and the authoritative list
//
// Two views of the same people:
// - MemberRecord: what the store holds right now (stable id, messy values)
// - AuthoritativeEntry: what the hand-maintained list says should be there

use crate::names;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;

// ============================================================================
// MEMBER CATEGORY
// ============================================================================

/// Membership category.
///
/// The store may contain values written by older tools; those survive as
/// `Other` so listing never fails on legacy rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MemberCategory {
    /// Inactive member (inaktiver Bursche)
    Inaktiv,

    /// Active member (aktiver Bursche)
    Bursche,

    /// Probationary member (Fux)
    Fux,

    /// Staff, not a member
    Employee,

    /// Unrecognized value found in the store
    Other(String),
}

/// Order in which category groups of an authoritative list are walked
pub const CATEGORY_ORDER: [MemberCategory; 4] = [
    MemberCategory::Inaktiv,
    MemberCategory::Bursche,
    MemberCategory::Fux,
    MemberCategory::Employee,
];

impl MemberCategory {
    /// Parse one of the known categories (case-insensitive, English aliases accepted)
    pub fn parse_known(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "inaktiv" | "inactive" => Some(MemberCategory::Inaktiv),
            "bursche" | "active" => Some(MemberCategory::Bursche),
            "fux" | "probationary" => Some(MemberCategory::Fux),
            "employee" => Some(MemberCategory::Employee),
            _ => None,
        }
    }

    /// Wire/storage name
    pub fn as_str(&self) -> &str {
        match self {
            MemberCategory::Inaktiv => "inaktiv",
            MemberCategory::Bursche => "bursche",
            MemberCategory::Fux => "fux",
            MemberCategory::Employee => "employee",
            MemberCategory::Other(value) => value,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            MemberCategory::Inaktiv => "Inaktiver Bursche",
            MemberCategory::Bursche => "Aktiver Bursche",
            MemberCategory::Fux => "Fux",
            MemberCategory::Employee => "Angestellter",
            MemberCategory::Other(value) => value,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, MemberCategory::Other(_))
    }
}

impl From<String> for MemberCategory {
    fn from(value: String) -> Self {
        MemberCategory::parse_known(&value).unwrap_or(MemberCategory::Other(value))
    }
}

impl From<MemberCategory> for String {
    fn from(category: MemberCategory) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for MemberCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ADMIN ROLE
// ============================================================================

/// Free-form administrative role. Reconciliation never reads or writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminRole(pub String);

impl AdminRole {
    pub fn label(&self) -> &str {
        match self.0.as_str() {
            "systemadmin" => "Systemadmin",
            "va" => "Veranstaltungsleiter",
            "koch" => "Koch",
            "aktivenkasse" => "Aktivenkasse",
            other => other,
        }
    }
}

// ============================================================================
// MEMBER RECORD (store side)
// ============================================================================

/// One row of the member table.
///
/// `id` is opaque and never reused. `surname` may hold a whole
/// "first last" string for rows typed in before first names had a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,

    #[serde(default)]
    pub first_name: Option<String>,

    pub surname: String,

    pub category: MemberCategory,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_role: Option<AdminRole>,
}

impl MemberRecord {
    pub fn new(
        id: impl Into<String>,
        first_name: Option<&str>,
        surname: &str,
        category: MemberCategory,
    ) -> Self {
        MemberRecord {
            id: id.into(),
            first_name: first_name.map(str::to_string),
            surname: surname.to_string(),
            category,
            admin_role: None,
        }
    }

    /// First name or "" when the column is empty
    pub fn first_name_or_empty(&self) -> &str {
        self.first_name.as_deref().unwrap_or("")
    }

    pub fn label(&self) -> String {
        names::full_name(self.first_name.as_deref(), &self.surname)
    }

    pub fn has_merged_name(&self) -> bool {
        names::is_merged_full_name(self.first_name.as_deref(), &self.surname)
    }
}

/// Field values for a member that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub first_name: String,
    pub surname: Option<String>,
    pub category: MemberCategory,
}

/// Partial update: only `Some` fields are written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<MemberCategory>,
}

impl MemberChanges {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.surname.is_none() && self.category.is_none()
    }

    /// Apply to an in-memory record
    pub fn apply_to(&self, record: &mut MemberRecord) {
        if let Some(first_name) = &self.first_name {
            record.first_name = Some(first_name.clone());
        }
        if let Some(surname) = &self.surname {
            record.surname = surname.clone();
        }
        if let Some(category) = &self.category {
            record.category = category.clone();
        }
    }
}

// ============================================================================
// AUTHORITATIVE LIST (external input)
// ============================================================================

/// One person as the authoritative list states them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritativeEntry {
    pub first_name: String,

    /// `None` means only the first name is known
    #[serde(default)]
    pub surname: Option<String>,

    pub category: MemberCategory,
}

impl AuthoritativeEntry {
    /// Trims both names and treats a blank surname as absent
    pub fn new(first_name: &str, surname: Option<&str>, category: MemberCategory) -> Self {
        AuthoritativeEntry {
            first_name: first_name.trim().to_string(),
            surname: names::non_blank(surname),
            category,
        }
    }

    pub fn label(&self) -> String {
        names::display_label(&self.first_name, self.surname.as_deref())
    }
}

/// A name inside a category group of the JSON roster document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterName {
    pub first_name: String,

    #[serde(default)]
    pub surname: Option<String>,
}

/// JSON shape of the roster file: category name → names
pub type RosterDocument = BTreeMap<String, Vec<RosterName>>;

/// The authoritative list, kept in the order it will be matched.
///
/// Matching is greedy, so this order decides which record a later, weaker
/// entry may still claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthoritativeList {
    entries: Vec<AuthoritativeEntry>,
}

impl AuthoritativeList {
    /// Keep the given order as-is
    pub fn from_entries(entries: Vec<AuthoritativeEntry>) -> Self {
        AuthoritativeList { entries }
    }

    /// Build from category groups, walking groups in `CATEGORY_ORDER` and
    /// names in the order given inside each group.
    ///
    /// A category may appear under one key only: two aliases of the same
    /// group (`bursche` and `active`) have no defined order between them.
    pub fn from_groups(document: RosterDocument) -> Result<Self> {
        let mut groups: HashMap<MemberCategory, (String, Vec<RosterName>)> = HashMap::new();

        for (key, names) in document {
            let category = MemberCategory::parse_known(&key)
                .ok_or_else(|| anyhow!("Unknown member category in roster: {:?}", key))?;
            if let Some((earlier, _)) = groups.get(&category) {
                bail!(
                    "Roster lists category '{}' twice (as {:?} and {:?})",
                    category,
                    earlier,
                    key
                );
            }
            groups.insert(category, (key, names));
        }

        let mut entries = Vec::new();
        for category in CATEGORY_ORDER.iter() {
            let Some((_, names)) = groups.remove(category) else {
                continue;
            };
            for (position, name) in names.into_iter().enumerate() {
                if name.first_name.trim().is_empty() {
                    bail!(
                        "Roster entry {} in category '{}' has no first name",
                        position + 1,
                        category
                    );
                }
                entries.push(AuthoritativeEntry::new(
                    &name.first_name,
                    name.surname.as_deref(),
                    category.clone(),
                ));
            }
        }

        Ok(AuthoritativeList { entries })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: RosterDocument =
            serde_json::from_str(json).context("Failed to parse roster JSON")?;
        Self::from_groups(document)
    }

    /// CSV with headers `category,first_name,surname`, kept in row order
    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        #[derive(Deserialize)]
        struct Row {
            category: String,
            first_name: String,
            #[serde(default)]
            surname: Option<String>,
        }

        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut entries = Vec::new();

        for (index, result) in rdr.deserialize::<Row>().enumerate() {
            let row_number = index + 1;
            let row = result.with_context(|| format!("Failed to read roster row {}", row_number))?;

            let category = MemberCategory::parse_known(&row.category).ok_or_else(|| {
                anyhow!("Roster row {}: unknown category {:?}", row_number, row.category)
            })?;
            if row.first_name.trim().is_empty() {
                bail!("Roster row {}: first name is required", row_number);
            }

            entries.push(AuthoritativeEntry::new(
                &row.first_name,
                row.surname.as_deref(),
                category,
            ));
        }

        Ok(AuthoritativeList { entries })
    }

    /// Load from disk: `.csv` files as CSV, everything else as JSON
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let is_csv = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));

        if is_csv {
            let file = fs::File::open(path)
                .with_context(|| format!("Failed to open roster file: {:?}", path))?;
            Self::from_csv_reader(file)
        } else {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read roster file: {:?}", path))?;
            Self::from_json_str(&content)
        }
    }

    pub fn entries(&self) -> &[AuthoritativeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry count per category
    pub fn count_by_category(&self) -> Vec<(MemberCategory, usize)> {
        CATEGORY_ORDER
            .iter()
            .map(|category| {
                let count = self.entries.iter().filter(|e| &e.category == category).count();
                (category.clone(), count)
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_category_parsing() {
        assert_eq!(MemberCategory::parse_known("fux"), Some(MemberCategory::Fux));
        assert_eq!(MemberCategory::parse_known("FUX"), Some(MemberCategory::Fux));
        assert_eq!(MemberCategory::parse_known("active"), Some(MemberCategory::Bursche));
        assert_eq!(MemberCategory::parse_known("inactive"), Some(MemberCategory::Inaktiv));
        assert_eq!(MemberCategory::parse_known("probationary"), Some(MemberCategory::Fux));
        assert_eq!(MemberCategory::parse_known("alumni"), None);
    }

    #[test]
    fn test_unknown_category_survives_round_trip() {
        let category: MemberCategory = "alter herr".to_string().into();
        assert_eq!(category, MemberCategory::Other("alter herr".to_string()));
        assert!(!category.is_known());

        let json = serde_json::to_string(&category).unwrap();
        assert_eq!(json, "\"alter herr\"");
    }

    #[test]
    fn test_category_serializes_lowercase() {
        let json = serde_json::to_string(&MemberCategory::Employee).unwrap();
        assert_eq!(json, "\"employee\"");

        let parsed: MemberCategory = serde_json::from_str("\"Bursche\"").unwrap();
        assert_eq!(parsed, MemberCategory::Bursche);
    }

    #[test]
    fn test_admin_role_labels() {
        assert_eq!(AdminRole("va".to_string()).label(), "Veranstaltungsleiter");
        assert_eq!(AdminRole("kassenwart".to_string()).label(), "kassenwart");
    }

    #[test]
    fn test_entry_blank_surname_is_absent() {
        let entry = AuthoritativeEntry::new(" Kevin ", Some("  "), MemberCategory::Employee);
        assert_eq!(entry.first_name, "Kevin");
        assert_eq!(entry.surname, None);
        assert_eq!(entry.label(), "Kevin");
    }

    #[test]
    fn test_member_changes_apply() {
        let mut record = MemberRecord::new("1", None, "Theo Reichert", MemberCategory::Bursche);
        let changes = MemberChanges {
            first_name: Some("Theo".to_string()),
            surname: Some("Reichert".to_string()),
            category: Some(MemberCategory::Fux),
        };

        changes.apply_to(&mut record);

        assert_eq!(record.first_name.as_deref(), Some("Theo"));
        assert_eq!(record.surname, "Reichert");
        assert_eq!(record.category, MemberCategory::Fux);
        assert!(MemberChanges::default().is_empty());
    }

    #[test]
    fn test_groups_follow_category_order() {
        let json = r#"{
            "employee": [{"first_name": "Kevin"}],
            "fux": [
                {"first_name": "Johannes", "surname": "Bauer"},
                {"first_name": "Theo", "surname": "Reichert"}
            ],
            "inaktiv": [{"first_name": "Constantin", "surname": "Lehmann"}]
        }"#;

        let list = AuthoritativeList::from_json_str(json).unwrap();
        let labels: Vec<String> = list.entries().iter().map(|e| e.label()).collect();

        assert_eq!(
            labels,
            vec!["Constantin Lehmann", "Johannes Bauer", "Theo Reichert", "Kevin"]
        );
        assert_eq!(list.entries()[3].surname, None);
        assert_eq!(list.entries()[3].category, MemberCategory::Employee);
    }

    #[test]
    fn test_groups_reject_two_aliases_of_one_category() {
        let json = r#"{
            "bursche": [{"first_name": "Max", "surname": "Pallasch"}],
            "fux": [{"first_name": "Elias", "surname": "Kalla"}],
            "probationary": [{"first_name": "Theo", "surname": "Reichert"}]
        }"#;

        let err = AuthoritativeList::from_json_str(json).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Roster lists category 'fux' twice (as "fux" and "probationary")"#
        );
    }

    #[test]
    fn test_alias_key_alone_is_accepted() {
        let json = r#"{
            "active": [{"first_name": "Max", "surname": "Pallasch"}],
            "probationary": [
                {"first_name": "Theo", "surname": "Reichert"},
                {"first_name": "Elias", "surname": "Kalla"}
            ]
        }"#;

        let first = AuthoritativeList::from_json_str(json).unwrap();
        for _ in 0..20 {
            assert_eq!(AuthoritativeList::from_json_str(json).unwrap(), first);
        }

        let labels: Vec<String> = first.entries().iter().map(|e| e.label()).collect();
        assert_eq!(labels, vec!["Max Pallasch", "Theo Reichert", "Elias Kalla"]);
        assert_eq!(first.entries()[0].category, MemberCategory::Bursche);
    }

    #[test]
    fn test_groups_reject_unknown_category() {
        let json = r#"{"alumni": [{"first_name": "Hans"}]}"#;
        assert!(AuthoritativeList::from_json_str(json).is_err());
    }

    #[test]
    fn test_groups_reject_missing_first_name() {
        let json = r#"{"fux": [{"first_name": "  ", "surname": "Bauer"}]}"#;
        let err = AuthoritativeList::from_json_str(json).unwrap_err();
        assert!(err.to_string().contains("no first name"));
    }

    #[test]
    fn test_csv_keeps_row_order() {
        let csv = "category,first_name,surname\n\
                   fux,Jannik,Heidepriem\n\
                   employee,Kevin,\n\
                   bursche,Max,Pallasch\n";

        let list = AuthoritativeList::from_csv_reader(csv.as_bytes()).unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list.entries()[0].label(), "Jannik Heidepriem");
        assert_eq!(list.entries()[1].surname, None);
        assert_eq!(list.entries()[2].category, MemberCategory::Bursche);
    }

    #[test]
    fn test_csv_rejects_unknown_category() {
        let csv = "category,first_name,surname\nguest,Anna,Schmidt\n";
        let err = AuthoritativeList::from_csv_reader(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_from_path_dispatches_on_extension() {
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("roster.csv");
        let mut file = fs::File::create(&csv_path).unwrap();
        writeln!(file, "category,first_name,surname").unwrap();
        writeln!(file, "fux,Elias,Kalla").unwrap();

        let json_path = dir.path().join("roster.json");
        fs::write(&json_path, r#"{"fux": [{"first_name": "Elias", "surname": "Kalla"}]}"#).unwrap();

        let from_csv = AuthoritativeList::from_path(&csv_path).unwrap();
        let from_json = AuthoritativeList::from_path(&json_path).unwrap();

        assert_eq!(from_csv, from_json);
    }

    #[test]
    fn test_count_by_category() {
        let list = AuthoritativeList::from_entries(vec![
            AuthoritativeEntry::new("Johannes", Some("Bauer"), MemberCategory::Fux),
            AuthoritativeEntry::new("Theo", Some("Reichert"), MemberCategory::Fux),
            AuthoritativeEntry::new("Kevin", None, MemberCategory::Employee),
        ]);

        let counts = list.count_by_category();
        assert_eq!(counts[2], (MemberCategory::Fux, 2));
        assert_eq!(counts[3], (MemberCategory::Employee, 1));
        assert_eq!(counts[0], (MemberCategory::Inaktiv, 0));
    }
}
