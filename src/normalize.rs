//! Title and date normalization shared by the movie resolver and dedupe.
//!
//! Titles coming out of MAL are compared against TMDB and AniDB titles, which
//! differ in case, punctuation and "Movie" suffixes. Everything here is pure.

use any_ascii::any_ascii;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Leading four-digit year of a release date ("2020", "2020-05", "2020-05-01").
pub static YEAR_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}").unwrap());

/// Regex to collapse runs of whitespace into a single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Movie-specific suffixes stripped when generating fallback search titles.
/// Longest first so " the Movie" wins over " Movie".
const MOVIE_SUFFIXES: &[&str] = &[" the Movie", " (Movie)", " - Movie", " Movie"];

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Check if a character is a Unicode combining mark (diacritical mark).
pub fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Kana and CJK ideographs. any_ascii romanizes these into something no search
/// engine will match, so folding is skipped for titles that contain them.
fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0xFF66..=0xFF9F)
}

/// Fold Unicode text to ASCII by applying NFKD decomposition and removing combining marks.
/// e.g., "Pokémon" → "pokemon", "Shōjo" → "shojo"
pub fn fold_to_ascii(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    any_ascii(&stripped).to_lowercase()
}

/// Collapse internal whitespace and trim.
pub fn collapse_whitespace(s: &str) -> String {
    MULTI_SPACE.replace_all(s.trim(), " ").to_string()
}

/// Case-insensitive equality. Empty strings never match anything.
pub fn titles_equal(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && a.to_lowercase() == b.to_lowercase()
}

/// Case-insensitive substring containment in either direction.
/// Empty strings never match anything.
pub fn titles_overlap(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

// ============================================================================
// RELEASE DATES
// ============================================================================

/// The four-digit year prefix of a release date, if any.
pub fn year_str(date: &str) -> Option<&str> {
    YEAR_PREFIX.find(date).map(|m| m.as_str())
}

pub fn release_year(date: &str) -> Option<i32> {
    year_str(date).and_then(|y| y.parse().ok())
}

/// Full `YYYY-MM-DD` date. Partial dates return None.
pub fn parse_release_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

// ============================================================================
// SEARCH TITLE VARIANTS
// ============================================================================

/// Strip one trailing movie suffix, matched case-insensitively.
fn strip_movie_suffix(title: &str) -> Option<String> {
    MOVIE_SUFFIXES.iter().find_map(|suffix| {
        let cut = title.len().checked_sub(suffix.len())?;
        if cut > 0 && title.is_char_boundary(cut) && title[cut..].eq_ignore_ascii_case(suffix) {
            Some(title[..cut].trim_end().to_string())
        } else {
            None
        }
    })
}

/// Mechanical rewrites of a title used for fallback searches.
///
/// Produces: the title without a movie suffix, "vs."/"vs"/"versus" swaps, and
/// a whitespace-collapsed form. The input itself and blank or repeated
/// variants are dropped.
pub fn title_variants(title: &str) -> Vec<String> {
    let mut raw = Vec::new();

    if let Some(stripped) = strip_movie_suffix(title) {
        raw.push(stripped);
    }

    if title.contains(" vs. ") {
        raw.push(title.replace(" vs. ", " vs "));
        raw.push(title.replace(" vs. ", " versus "));
    } else if title.contains(" vs ") {
        raw.push(title.replace(" vs ", " vs. "));
        raw.push(title.replace(" vs ", " versus "));
    }

    raw.push(collapse_whitespace(title));

    let mut variants: Vec<String> = Vec::new();
    for candidate in raw {
        let candidate = collapse_whitespace(&candidate);
        if candidate.is_empty() || candidate == title {
            continue;
        }
        if !variants.iter().any(|v| v == &candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// ASCII-folded search title for Latin titles carrying diacritics.
/// None when folding would not change anything useful.
pub fn ascii_search_title(title: &str) -> Option<String> {
    if title.is_ascii() || title.chars().any(is_cjk) {
        return None;
    }
    let folded = collapse_whitespace(&fold_to_ascii(title));
    if folded.is_empty() || titles_equal(&folded, title) {
        None
    } else {
        Some(folded)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_to_ascii() {
        assert_eq!(fold_to_ascii("Pokémon"), "pokemon");
        assert_eq!(fold_to_ascii("Shōjo Kakumei"), "shojo kakumei");
    }

    #[test]
    fn test_release_year() {
        assert_eq!(release_year("2020-05-01"), Some(2020));
        assert_eq!(release_year("1998"), Some(1998));
        assert_eq!(release_year("2001-04"), Some(2001));
        assert_eq!(release_year(""), None);
        assert_eq!(release_year("unknown"), None);
    }

    #[test]
    fn test_parse_release_date_requires_full_date() {
        assert!(parse_release_date("2020-05-01").is_some());
        assert!(parse_release_date("2020-05").is_none());
        assert!(parse_release_date("").is_none());
    }

    #[test]
    fn test_titles_equal_and_overlap() {
        assert!(titles_equal("Foo Movie", "foo movie"));
        assert!(!titles_equal("", ""));
        assert!(titles_overlap("Foo Movie", "foo"));
        assert!(titles_overlap("foo", "Foo Movie"));
        assert!(!titles_overlap("Bar", "Foo Movie"));
        assert!(!titles_overlap("", "Foo"));
    }

    #[test]
    fn test_title_variants_movie_suffix() {
        let v = title_variants("Eiga Crayon Shin-chan the Movie");
        assert_eq!(v, vec!["Eiga Crayon Shin-chan".to_string()]);

        let v = title_variants("Kaiju (Movie)");
        assert_eq!(v, vec!["Kaiju".to_string()]);

        let v = title_variants("Some Title MOVIE");
        assert_eq!(v, vec!["Some Title".to_string()]);
    }

    #[test]
    fn test_title_variants_versus() {
        let v = title_variants("Godzilla vs. Kong");
        assert!(v.contains(&"Godzilla vs Kong".to_string()));
        assert!(v.contains(&"Godzilla versus Kong".to_string()));

        let v = title_variants("Freddy vs Jason");
        assert!(v.contains(&"Freddy vs. Jason".to_string()));
        assert!(v.contains(&"Freddy versus Jason".to_string()));
    }

    #[test]
    fn test_title_variants_whitespace_only() {
        assert_eq!(title_variants("Foo   Bar"), vec!["Foo Bar".to_string()]);
        assert!(title_variants("Plain Title").is_empty());
    }

    #[test]
    fn test_ascii_search_title() {
        assert_eq!(ascii_search_title("Pokémon the Movie"), Some("pokemon the movie".to_string()));
        assert_eq!(ascii_search_title("Plain"), None);
        assert_eq!(ascii_search_title("君の名は。"), None);
    }
}
