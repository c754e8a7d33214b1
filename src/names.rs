// 🔤 Name Helpers - Normalization used by matching and reporting
//
// Names in the store were typed by hand over several years: umlauts, double
// surnames ("Polo Morawietz") and whole names in the surname column all occur.
// Everything here counts in chars, never bytes, so "Schälicke" behaves.

/// Case-folded form used for every case-insensitive comparison
pub fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Case-insensitive equality
pub fn eq_folded(a: &str, b: &str) -> bool {
    fold(a) == fold(b)
}

/// Length in chars
pub fn char_len(name: &str) -> usize {
    name.chars().count()
}

/// First `n` chars of `name` (the whole string if shorter)
pub fn prefix(name: &str, n: usize) -> &str {
    match name.char_indices().nth(n) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// True if one name contains the other.
///
/// An empty name is contained in everything, so it always overlaps.
pub fn overlaps(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Human-readable "first surname" label used in plans and apply reports
pub fn display_label(first_name: &str, surname: Option<&str>) -> String {
    format!("{} {}", first_name, surname.unwrap_or("")).trim().to_string()
}

/// Value kept in the store's derived `full_name` column
pub fn full_name(first_name: Option<&str>, surname: &str) -> String {
    format!("{} {}", first_name.unwrap_or(""), surname).trim().to_string()
}

/// A record with no first name whose surname holds several words was most
/// likely entered as "first last" in the surname column.
pub fn is_merged_full_name(first_name: Option<&str>, surname: &str) -> bool {
    first_name.map_or(true, |f| f.trim().is_empty()) && surname.trim().contains(' ')
}

/// Split a merged name at its first whitespace:
/// "Leandro Polo Morawietz" → ("Leandro", "Polo Morawietz")
pub fn split_merged(full: &str) -> Option<(&str, &str)> {
    let (first, rest) = full.trim().split_once(char::is_whitespace)?;
    Some((first, rest.trim_start()))
}

/// Trim and turn blank strings into `None`
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
