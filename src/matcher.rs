// 🔍 Identity Matcher - Find the store record behind an authoritative entry
// Three tiers, tried in order: exact surname, first name only, fuzzy surname
//
// The first tier that produces a candidate wins outright; lower tiers are
// never consulted once a higher one has candidates. Within a tier the highest
// score wins and ties go to the record enumerated first.

use crate::names;
use crate::roster::{AuthoritativeEntry, MemberRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// MATCH TIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Surnames equal (case-insensitive), first-name agreement adds a bonus
    Surname,

    /// First name equals the record's first name, or the surname of a record
    /// that has no first name (solo names stored in the surname column)
    FirstName,

    /// Surnames close in length sharing a four-char prefix ("Heideprim" / "Heidepriem")
    FuzzySurname,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::Surname => "surname",
            MatchTier::FirstName => "first name",
            MatchTier::FuzzySurname => "fuzzy surname",
        }
    }
}

// ============================================================================
// MATCH CANDIDATE
// ============================================================================

/// A scored record considered for one authoritative entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate<'a> {
    pub score: u32,
    pub tier: MatchTier,
    pub record: &'a MemberRecord,
}

// ============================================================================
// IDENTITY MATCHER
// ============================================================================

pub struct IdentityMatcher {
    /// Base score for an exact surname match (default: 100)
    pub surname_score: u32,

    /// Bonus when first names are equal too (default: 50)
    pub first_name_bonus: u32,

    /// Bonus when one first name contains the other (default: 25)
    pub partial_first_name_bonus: u32,

    /// Flat score for a first-name-only match (default: 50)
    pub first_name_score: u32,

    /// Flat score for a fuzzy surname match (default: 30)
    pub fuzzy_score: u32,

    /// Largest surname length difference, in chars, a fuzzy match tolerates (default: 2)
    pub fuzzy_max_length_diff: usize,

    /// Prefix length, in chars, compared by the fuzzy tier (default: 4)
    pub fuzzy_prefix_len: usize,
}

impl IdentityMatcher {
    /// Create matcher with default scores
    pub fn new() -> Self {
        IdentityMatcher {
            surname_score: 100,
            first_name_bonus: 50,
            partial_first_name_bonus: 25,
            first_name_score: 50,
            fuzzy_score: 30,
            fuzzy_max_length_diff: 2,
            fuzzy_prefix_len: 4,
        }
    }

    /// Best unconsumed record for `entry`, or `None` when an insert is needed.
    ///
    /// `records` must be in store enumeration order: that order breaks ties.
    pub fn find_best_match<'a>(
        &self,
        entry: &AuthoritativeEntry,
        records: &'a [MemberRecord],
        consumed: &HashSet<String>,
    ) -> Option<MatchCandidate<'a>> {
        let available: Vec<&'a MemberRecord> = records
            .iter()
            .filter(|record| !consumed.contains(&record.id))
            .collect();

        let candidates = {
            let tier1 = self.surname_candidates(entry, &available);
            if !tier1.is_empty() {
                tier1
            } else {
                let tier2 = self.first_name_candidates(entry, &available);
                if !tier2.is_empty() {
                    tier2
                } else {
                    self.fuzzy_candidates(entry, &available)
                }
            }
        };

        Self::pick_highest(candidates)
    }

    /// Highest score; on ties the earliest candidate stays
    fn pick_highest(candidates: Vec<MatchCandidate<'_>>) -> Option<MatchCandidate<'_>> {
        let mut best: Option<MatchCandidate<'_>> = None;
        for candidate in candidates {
            match &best {
                Some(current) if candidate.score <= current.score => {}
                _ => best = Some(candidate),
            }
        }
        best
    }

    /// Tier 1: exact surname
    fn surname_candidates<'a>(
        &self,
        entry: &AuthoritativeEntry,
        available: &[&'a MemberRecord],
    ) -> Vec<MatchCandidate<'a>> {
        let Some(surname) = entry.surname.as_deref().filter(|s| !s.is_empty()) else {
            return Vec::new();
        };
        let surname = names::fold(surname);
        let first = names::fold(&entry.first_name);

        available
            .iter()
            .filter(|record| !record.surname.is_empty() && names::fold(&record.surname) == surname)
            .map(|&record| {
                let record_first = names::fold(record.first_name_or_empty());
                let bonus = if record_first == first {
                    self.first_name_bonus
                } else if names::overlaps(&first, &record_first) {
                    self.partial_first_name_bonus
                } else {
                    0
                };

                MatchCandidate {
                    score: self.surname_score + bonus,
                    tier: MatchTier::Surname,
                    record,
                }
            })
            .collect()
    }

    /// Tier 2: first name only
    fn first_name_candidates<'a>(
        &self,
        entry: &AuthoritativeEntry,
        available: &[&'a MemberRecord],
    ) -> Vec<MatchCandidate<'a>> {
        if entry.first_name.is_empty() {
            return Vec::new();
        }
        let first = names::fold(&entry.first_name);

        available
            .iter()
            .filter(|record| {
                let record_first = record.first_name_or_empty();
                if record_first.is_empty() {
                    !record.surname.is_empty() && names::fold(&record.surname) == first
                } else {
                    names::fold(record_first) == first
                }
            })
            .map(|&record| MatchCandidate {
                score: self.first_name_score,
                tier: MatchTier::FirstName,
                record,
            })
            .collect()
    }

    /// Tier 3: fuzzy surname
    fn fuzzy_candidates<'a>(
        &self,
        entry: &AuthoritativeEntry,
        available: &[&'a MemberRecord],
    ) -> Vec<MatchCandidate<'a>> {
        let Some(surname) = entry.surname.as_deref().filter(|s| !s.is_empty()) else {
            return Vec::new();
        };
        let surname = names::fold(surname);

        available
            .iter()
            .filter(|record| {
                !record.surname.is_empty()
                    && self.surnames_similar(&surname, &names::fold(&record.surname))
            })
            .map(|&record| MatchCandidate {
                score: self.fuzzy_score,
                tier: MatchTier::FuzzySurname,
                record,
            })
            .collect()
    }

    /// Both inputs already folded
    pub fn surnames_similar(&self, a: &str, b: &str) -> bool {
        if names::char_len(a).abs_diff(names::char_len(b)) > self.fuzzy_max_length_diff {
            return false;
        }

        b.starts_with(names::prefix(a, self.fuzzy_prefix_len))
            || a.starts_with(names::prefix(b, self.fuzzy_prefix_len))
    }
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
