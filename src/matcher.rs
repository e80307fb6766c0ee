//! Fuzzy team-name and date matching between the ledger and the result feed.
//!
//! The feed spells and abbreviates teams differently from the source that
//! captured the tip ("Atlético GO" vs "Atletico Goianiense"), so names are
//! compared loosely. Dates are tolerated one day either side to absorb
//! timezone / day-boundary skew.

use chrono::{Duration, NaiveDate};

/// Shared tokens must be longer than this to count as a match.
const MIN_SHARED_TOKEN_LEN: usize = 3;

/// Separators accepted between the two teams of a match label, lowercase.
const LABEL_SEPARATORS: &[&str] = &[" vs. ", " vs ", " v ", " x ", " - "];

/// True if one name contains the other or they share a whitespace token
/// longer than 3 characters. Case and diacritics are ignored.
pub fn names_match(a: &str, b: &str) -> bool {
    let a = fold(a);
    let b = fold(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(&b) || b.contains(&a) {
        return true;
    }
    a.split_whitespace()
        .filter(|t| t.chars().count() > MIN_SHARED_TOKEN_LEN)
        .any(|t| b.split_whitespace().any(|u| u == t))
}

/// Lowercase ASCII transliteration ("Atlético" → "atletico").
fn fold(name: &str) -> String {
    deunicode::deunicode(name.trim()).to_lowercase()
}

/// Both sides must match independently. Sides are not swapped.
pub fn teams_match(
    stored_home: &str,
    stored_away: &str,
    candidate_home: &str,
    candidate_away: &str,
) -> bool {
    names_match(stored_home, candidate_home) && names_match(stored_away, candidate_away)
}

/// Split "Home vs Away" into its two team names. Returns None when no
/// separator is found or either side is empty.
pub fn split_match_label(label: &str) -> Option<(String, String)> {
    let lower = label.to_lowercase();
    for sep in LABEL_SEPARATORS {
        if let Some(idx) = lower.find(sep) {
            // Lowercasing can change byte lengths for some scripts, so slice the
            // lowercased copy only when lengths agree.
            let (home, away) = if lower.len() == label.len() {
                (&label[..idx], &label[idx + sep.len()..])
            } else {
                (&lower[..idx], &lower[idx + sep.len()..])
            };
            let home = home.trim();
            let away = away.trim();
            if home.is_empty() || away.is_empty() {
                return None;
            }
            return Some((home.to_string(), away.to_string()));
        }
    }
    None
}

/// Dates to try for a lookup, in order: the requested date, the day before,
/// the day after.
pub fn candidate_dates(date: NaiveDate) -> [NaiveDate; 3] {
    [
        date,
        date.checked_sub_signed(Duration::days(1)).unwrap_or(date),
        date.checked_add_signed(Duration::days(1)).unwrap_or(date),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_matches_either_direction() {
        assert!(names_match("Athletic Club", "athletic"));
        assert!(names_match("PSG", "psg"));
        assert!(names_match("Inter", "Inter Milan"));
    }

    #[test]
    fn shared_long_token_matches() {
        assert!(names_match("Atlético GO", "Atlético Goianiense"));
        assert!(names_match("Real Madrid CF", "Madrid Real"));
    }

    #[test]
    fn accents_are_ignored() {
        assert!(names_match("Atlético GO", "Atletico Goianiense"));
        assert!(names_match("São Paulo", "Sao Paulo"));
        assert!(names_match("Mönchengladbach", "Borussia Monchengladbach"));
        assert!(teams_match(
            "Athletic Club",
            "Atlético GO",
            "Athletic Club",
            "Atletico Goianiense"
        ));
    }

    #[test]
    fn short_shared_tokens_do_not_match() {
        // "club" is 4 chars and would match; "fc" and "cf" are too short.
        assert!(!names_match("FC Porto", "FC Barcelona"));
        assert!(!names_match("Man Utd", "Man City"));
    }

    #[test]
    fn empty_names_never_match() {
        assert!(!names_match("", "Arsenal"));
        assert!(!names_match("  ", ""));
    }

    #[test]
    fn both_sides_must_match() {
        assert!(teams_match(
            "Athletic Club",
            "Atlético GO",
            "Athletic Club",
            "Atlético Goianiense"
        ));
        assert!(!teams_match("Athletic Club", "Atlético GO", "Athletic Club", "Vasco"));
        // Reversed fixture does not count.
        assert!(!teams_match("Arsenal", "Chelsea", "Chelsea", "Arsenal"));
    }

    #[test]
    fn splits_common_label_formats() {
        assert_eq!(
            split_match_label("Athletic Club vs Atlético GO"),
            Some(("Athletic Club".to_string(), "Atlético GO".to_string()))
        );
        assert_eq!(
            split_match_label("Arsenal VS. Chelsea"),
            Some(("Arsenal".to_string(), "Chelsea".to_string()))
        );
        assert_eq!(
            split_match_label("Boca Juniors - River Plate"),
            Some(("Boca Juniors".to_string(), "River Plate".to_string()))
        );
        assert_eq!(split_match_label("Arsenal"), None);
        assert_eq!(split_match_label(" vs Chelsea"), None);
    }

    #[test]
    fn candidate_dates_order() {
        let d = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let [a, b, c] = candidate_dates(d);
        assert_eq!(a, d);
        assert_eq!(b, NaiveDate::from_ymd_opt(2025, 7, 31).unwrap());
        assert_eq!(c, NaiveDate::from_ymd_opt(2025, 8, 2).unwrap());
    }
}
